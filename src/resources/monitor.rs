use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};

use crate::error::SampleError;

/// Host utilisation, both in percent of the whole machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Usage {
    pub cpu: f64,
    pub mem: f64,
}

/// Fixed host totals, read once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub logical_cores: usize,
    pub total_memory: u64,
}

/// Source of live host utilisation.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    /// Samples the current CPU and memory utilisation.
    async fn current_usage(&self) -> Result<Usage, SampleError>;

    /// Returns the host totals used to turn absolute costs into percentages.
    fn capacity(&self) -> Capacity;
}

/// A `ResourceMonitor` backed by `sysinfo`.
///
/// CPU usage is averaged over all cores across a short window, memory is the
/// instantaneous used/total ratio.
pub struct SysinfoMonitor {
    window: Duration,
    capacity: Capacity,
}

impl SysinfoMonitor {
    /// Creates a new `SysinfoMonitor`.
    ///
    /// # Arguments
    /// * `window` - How long each CPU sample spans. Raised to sysinfo's minimum if shorter.
    pub fn new(window: Duration) -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_cpu(CpuRefreshKind::nothing())
                .with_memory(MemoryRefreshKind::nothing().with_ram()),
        );

        let logical_cores = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        };

        Self {
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            capacity: Capacity {
                logical_cores,
                total_memory: system.total_memory(),
            },
        }
    }
}

#[async_trait]
impl ResourceMonitor for SysinfoMonitor {
    async fn current_usage(&self) -> Result<Usage, SampleError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SampleError::Unsupported);
        }

        // Each call owns its `System` so concurrent samplers don't shorten each other's window.
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        tokio::time::sleep(self.window).await;
        system.refresh_cpu_usage();
        system.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        let cpu = system.global_cpu_usage() as f64;
        if !cpu.is_finite() {
            return Err(SampleError::InvalidReading("cpu"));
        }

        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError::InvalidReading("memory"));
        }

        Ok(Usage {
            cpu,
            mem: system.used_memory() as f64 / total as f64 * 100.0,
        })
    }

    fn capacity(&self) -> Capacity {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn samples_are_percentages() {
        let monitor = SysinfoMonitor::new(Duration::from_millis(10));
        assert!(monitor.capacity().logical_cores >= 1);

        let Ok(usage) = monitor.current_usage().await else {
            return;
        };

        assert!((0.0..=100.0 + 1e-6).contains(&usage.cpu), "cpu {}", usage.cpu);
        assert!((0.0..=100.0 + 1e-6).contains(&usage.mem), "mem {}", usage.mem);
    }
}
