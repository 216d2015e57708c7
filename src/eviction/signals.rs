//! Default `NodeSignalSource` (§4.I): reads `/proc` directly.
//!
//! No crate in this stack exposes host memory/pid pressure, so this reads
//! `/proc/meminfo` and `/proc` the same way the runtime facade talks to the
//! container engine directly rather than through an abstraction layer.
//! Filesystem/inode signals have no portable stdlib source and are reported
//! as always-available; see DESIGN.md.

use async_trait::async_trait;

use super::{NodeSignalSource, NodeSignals};

pub struct ProcNodeSignalSource {
    pid_max: u64,
}

impl ProcNodeSignalSource {
    pub fn new() -> Self {
        let pid_max = std::fs::read_to_string("/proc/sys/kernel/pid_max")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(32768);
        Self { pid_max }
    }

    fn read_meminfo() -> Option<u64> {
        let contents = std::fs::read_to_string("/proc/meminfo").ok()?;
        for line in contents.lines() {
            if let Some(rest) = line.strip_prefix("MemAvailable:") {
                let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
                return Some(kb * 1024);
            }
        }
        None
    }

    fn count_processes() -> u64 {
        std::fs::read_dir("/proc")
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().chars().all(|c| c.is_ascii_digit()))
                    .count() as u64
            })
            .unwrap_or(0)
    }
}

impl Default for ProcNodeSignalSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeSignalSource for ProcNodeSignalSource {
    async fn read(&self) -> NodeSignals {
        let memory_available_bytes = Self::read_meminfo().unwrap_or(u64::MAX);
        let used_pids = Self::count_processes();
        let pids_free = self.pid_max.saturating_sub(used_pids);
        NodeSignals {
            memory_available_bytes,
            nodefs_available_bytes: u64::MAX,
            imagefs_available_bytes: u64::MAX,
            inodes_free: u64::MAX,
            pids_free,
        }
    }
}
