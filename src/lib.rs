//! Node agent library crate: pod lifecycle control plane (sources, cache,
//! PLEG, prober, eviction, sync and the per-pod dispatcher).

pub mod backoff;
pub mod cache;
pub mod config;
pub mod errors;
pub mod eviction;
pub mod mirror;
pub mod pleg;
pub mod pod_manager;
pub mod probes;
pub mod runtime;
pub mod sources;
pub mod status;
pub mod supervise;
pub mod sync_pod;
pub mod types;
pub mod worker;
