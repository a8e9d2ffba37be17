//! Host metrics from the operating system via `sysinfo`.

use std::path::Path;

use async_trait::async_trait;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ratsensor_types::{SystemValues, format_uptime};

use crate::simulated::round1;
use crate::traits::MetricsSource;

/// Disk, memory, CPU and uptime for the local host.
///
/// CPU usage is the average over [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`]
/// sampled at read time.
pub struct SystemMetrics {
    system: Mutex<System>,
}

impl std::fmt::Debug for SystemMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMetrics").finish_non_exhaustive()
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMetrics {
    pub fn new() -> Self {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            warn!("sysinfo does not support this platform; host metrics will be empty");
        }
        Self {
            system: Mutex::new(System::new()),
        }
    }

    async fn cpu_percent(&self) -> Option<f64> {
        let mut system = self.system.lock().await;
        system.refresh_cpu();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        system.refresh_cpu();
        if system.cpus().is_empty() {
            return None;
        }
        Some(round1(f64::from(system.global_cpu_info().cpu_usage())))
    }

    async fn memory_percent(&self) -> Option<f64> {
        let mut system = self.system.lock().await;
        system.refresh_memory();
        percent(system.used_memory(), system.total_memory())
    }
}

fn root_disk_percent() -> Option<f64> {
    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))?;
    let total = root.total_space();
    percent(total.saturating_sub(root.available_space()), total)
}

fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(round1(used as f64 / total as f64 * 100.0))
}

#[async_trait]
impl MetricsSource for SystemMetrics {
    async fn read_system_info(&self) -> SystemValues {
        let disk_percent = root_disk_percent();
        let memory_percent = self.memory_percent().await;
        let cpu_percent = self.cpu_percent().await;

        let uptime = System::uptime();
        let (uptime_seconds, uptime_human) = if uptime > 0 {
            (Some(uptime), Some(format_uptime(uptime)))
        } else {
            (None, None)
        };

        debug!(
            ?disk_percent,
            ?memory_percent,
            ?cpu_percent,
            uptime_seconds = uptime,
            "Read system info"
        );

        SystemValues {
            disk_percent,
            memory_percent,
            cpu_percent,
            uptime_seconds,
            uptime_human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), None);
        assert_eq!(percent(1, 3), Some(33.3));
        assert_eq!(percent(50, 100), Some(50.0));
    }

    #[tokio::test]
    async fn test_reads_values_in_range() {
        let metrics = SystemMetrics::new();
        let values = metrics.read_system_info().await;
        for pct in [values.memory_percent, values.disk_percent, values.cpu_percent]
            .into_iter()
            .flatten()
        {
            assert!((0.0..=100.0).contains(&pct), "{pct}");
        }
        if let (Some(secs), Some(human)) = (values.uptime_seconds, values.uptime_human) {
            assert_eq!(human, format_uptime(secs));
        }
    }
}
