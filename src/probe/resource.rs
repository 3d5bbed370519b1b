//! Local resource probe: disk, CPU and memory percent used.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use super::{metric, Measurement, Probe, ProbeError, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Target is the mount point, e.g. `/`.
    Disk,
    Cpu,
    Memory,
}

pub struct ResourceProbe {
    kind: ResourceKind,
}

impl ResourceProbe {
    pub fn new(kind: ResourceKind) -> Self {
        Self { kind }
    }
}

fn percent_used(used: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| used as f64 / total as f64 * 100.0)
}

fn disk_percent_used(mount: &str) -> Result<f64, ProbeError> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new(mount))
        .ok_or_else(|| ProbeError::Config(format!("no filesystem mounted at {}", mount)))?;

    let total = disk.total_space();
    let used = total.saturating_sub(disk.available_space());
    percent_used(used, total)
        .ok_or_else(|| ProbeError::Command(format!("filesystem at {} reports zero size", mount)))
}

fn cpu_percent_used() -> f64 {
    // CPU usage is a delta between two refreshes
    let mut sys = System::new();
    sys.refresh_cpu();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu();
    sys.global_cpu_info().cpu_usage() as f64
}

fn memory_percent_used() -> Result<f64, ProbeError> {
    let mut sys = System::new();
    sys.refresh_memory();
    percent_used(sys.used_memory(), sys.total_memory())
        .ok_or_else(|| ProbeError::Command("total memory reported as zero".to_string()))
}

#[async_trait]
impl Probe for ResourceProbe {
    async fn measure(&self, target: &Target, _timeout: Duration) -> Result<Measurement, ProbeError> {
        let kind = self.kind;
        let mount = target.as_str().to_string();

        let percent = tokio::task::spawn_blocking(move || match kind {
            ResourceKind::Disk => disk_percent_used(&mount),
            ResourceKind::Cpu => Ok(cpu_percent_used()),
            ResourceKind::Memory => memory_percent_used(),
        })
        .await
        .map_err(|e| ProbeError::Command(format!("spawn_blocking failed: {}", e)))??;

        Ok(Measurement::ok().with(metric::PERCENT_USED, percent))
    }
}
