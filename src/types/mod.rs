pub mod event;
pub mod pod;
pub mod runtime;

pub use event::{LifecycleEvent, LifecycleEventKind};
pub use pod::{ContainerSpec, Pod, PodSpec, PodUid, ProbeKind, QosClass, RestartPolicy};
pub use runtime::{ContainerEvent, ContainerState, ContainerStatus, RuntimeError, RuntimePodStatus};
