//! Node agent configuration, loaded from environment variables.
//!
//! Follows the teacher's `config.rs`: a plain struct populated with
//! `unwrap_or`/`expect` defaults, no flag-parsing crate (out of scope per
//! spec.md §1).

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    pub sink_url: String,

    /// §4.F generic PLEG relist period (default 1s).
    pub pleg_relist_period: Duration,
    /// §4.F evented PLEG UpdateTime tick period (default 5s).
    pub pleg_evented_tick_period: Duration,
    /// §4.F consecutive evented-stream failures before falling back to relist.
    pub pleg_max_stream_retries: u32,
    /// §4.F generic PLEG relist-staleness threshold before reporting unhealthy.
    pub pleg_relist_threshold: Duration,

    /// §4.B pod cache `UpdateTime` tick period (default 5s).
    pub cache_tick_period: Duration,

    /// §4.J dispatcher periodic tick (default a few seconds).
    pub dispatcher_tick_period: Duration,

    /// §4.I eviction loop period (default 10s).
    pub eviction_period: Duration,
    /// §4.I soft memory threshold, bytes of `MemoryAvailable` (default 200MiB).
    pub eviction_soft_memory_threshold_bytes: u64,
    /// §4.I grace period a soft memory breach must persist before acting.
    pub eviction_soft_memory_grace: Duration,
    /// §4.I hard memory threshold, acted on immediately (default 100MiB).
    pub eviction_hard_memory_threshold_bytes: u64,

    /// §6 built-in sources' poll/rescan period (default 20s).
    pub source_poll_period: Duration,
    /// §6 filesystem source manifest directory.
    pub static_pod_dir: String,
    /// §6 URL source endpoint; source is not started when unset.
    pub static_pod_url: Option<String>,

    /// §4.G status flush period (default 5s).
    pub status_flush_period: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            node_name: env_string("NODE_NAME", "worker-node"),
            sink_url: env_string("AGENT_SINK_URL", "http://localhost:7620"),
            pleg_relist_period: env_secs("PLEG_RELIST_PERIOD_SECS", 1),
            pleg_evented_tick_period: env_secs("PLEG_EVENTED_TICK_SECS", 5),
            pleg_max_stream_retries: env_u32("PLEG_MAX_STREAM_RETRIES", 5),
            pleg_relist_threshold: env_secs("PLEG_RELIST_THRESHOLD_SECS", 3 * 60),
            cache_tick_period: env_secs("CACHE_TICK_PERIOD_SECS", 5),
            dispatcher_tick_period: env_secs("DISPATCHER_TICK_PERIOD_SECS", 10),
            eviction_period: env_secs("EVICTION_PERIOD_SECS", 10),
            eviction_soft_memory_threshold_bytes: env_u64("EVICTION_SOFT_MEMORY_THRESHOLD_BYTES", 200 * 1024 * 1024),
            eviction_soft_memory_grace: env_secs("EVICTION_SOFT_MEMORY_GRACE_SECS", 90),
            eviction_hard_memory_threshold_bytes: env_u64("EVICTION_HARD_MEMORY_THRESHOLD_BYTES", 100 * 1024 * 1024),
            source_poll_period: env_secs("SOURCE_POLL_PERIOD_SECS", 20),
            static_pod_dir: env_string("STATIC_POD_DIR", "/etc/nodeagentd/pods"),
            static_pod_url: env::var("STATIC_POD_URL").ok().filter(|s| !s.is_empty()),
            status_flush_period: env_secs("STATUS_FLUSH_PERIOD_SECS", 5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "worker-node".to_string(),
            sink_url: "http://localhost:7620".to_string(),
            pleg_relist_period: Duration::from_secs(1),
            pleg_evented_tick_period: Duration::from_secs(5),
            pleg_max_stream_retries: 5,
            pleg_relist_threshold: Duration::from_secs(3 * 60),
            cache_tick_period: Duration::from_secs(5),
            dispatcher_tick_period: Duration::from_secs(10),
            eviction_period: Duration::from_secs(10),
            eviction_soft_memory_threshold_bytes: 200 * 1024 * 1024,
            eviction_soft_memory_grace: Duration::from_secs(90),
            eviction_hard_memory_threshold_bytes: 100 * 1024 * 1024,
            source_poll_period: Duration::from_secs(20),
            static_pod_dir: "/etc/nodeagentd/pods".to_string(),
            static_pod_url: None,
            status_flush_period: Duration::from_secs(5),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(key)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(default),
    )
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
