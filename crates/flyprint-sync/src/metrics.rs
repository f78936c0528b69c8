//! Host load sampling for the heartbeat.
//!
//! CPU usage needs two refreshes separated by sysinfo's minimum update
//! interval, so a sample takes roughly 200ms.

use async_trait::async_trait;
use sysinfo::{Disk, Disks, System};
use tokio::sync::Mutex;
use tracing::debug;

use flyprint_core::NodeLoad;

use crate::error::SyncResult;

/// Source of CPU / memory / disk percentages.
#[async_trait]
pub trait LoadSampler: Send + Sync {
    async fn sample(&self) -> SyncResult<NodeLoad>;
}

/// `sysinfo` backed sampler.
pub struct SystemLoadSampler {
    system: Mutex<System>,
}

impl SystemLoadSampler {
    pub fn new() -> Self {
        SystemLoadSampler {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadSampler for SystemLoadSampler {
    async fn sample(&self) -> SyncResult<NodeLoad> {
        let mut sys = self.system.lock().await;

        sys.refresh_cpu_usage();
        sys.refresh_memory();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();

        let cpu_percent = sys.global_cpu_info().cpu_usage();
        let memory_percent = percent_used(
            sys.total_memory(),
            sys.total_memory().saturating_sub(sys.available_memory()),
        );

        let disks = Disks::new_with_refreshed_list();
        let disk_percent = root_disk(&disks)
            .map(|d| {
                percent_used(
                    d.total_space(),
                    d.total_space().saturating_sub(d.available_space()),
                )
            })
            .unwrap_or(0.0);

        let load = NodeLoad {
            cpu_percent,
            memory_percent,
            disk_percent,
        };
        debug!(?load, "Sampled host load");
        Ok(load)
    }
}

/// The disk mounted at `/`, or the first one listed.
pub(crate) fn root_disk(disks: &Disks) -> Option<&Disk> {
    disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first())
}

fn percent_used(total: u64, used: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_used() {
        assert_eq!(percent_used(0, 0), 0.0);
        assert_eq!(percent_used(200, 50), 25.0);
        assert_eq!(percent_used(100, 100), 100.0);
    }

    #[tokio::test]
    async fn test_system_sample_is_in_range() {
        let load = SystemLoadSampler::new().sample().await.unwrap();
        for value in [load.cpu_percent, load.memory_percent, load.disk_percent] {
            assert!((0.0..=100.0).contains(&value), "out of range: {}", value);
        }
    }
}
