//! Periodic host usage report, independent of the job pipeline.

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Local;
use log::{debug, info, warn};
use tokio::{
    fs::{self, File},
    io::{self, AsyncWriteExt},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::resources::ResourceMonitor;

const HEADER: &str = "measured_at,cpu_percent,mem_percent\n";

/// Samples the host at a fixed interval and appends each sample to a CSV file.
pub struct PerformanceLog {
    path: PathBuf,
    interval: Duration,
    monitor: Arc<dyn ResourceMonitor>,
}

impl PerformanceLog {
    /// Creates a new `PerformanceLog`.
    ///
    /// # Arguments
    /// * `path` - The CSV report. Created, or truncated if it exists.
    /// * `interval` - Time between samples.
    /// * `monitor` - Where samples come from.
    pub fn new(path: impl Into<PathBuf>, interval: Duration, monitor: Arc<dyn ResourceMonitor>) -> Self {
        Self {
            path: path.into(),
            interval,
            monitor,
        }
    }

    /// Writes the header, then one row per sample until `cancel` fires.
    ///
    /// Failed samples are logged and skipped.
    ///
    /// # Returns
    /// An io error if the report cannot be created or written.
    pub async fn run(self, cancel: CancellationToken) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let mut file = File::create(&self.path).await?;
        file.write_all(HEADER.as_bytes()).await?;
        file.flush().await?;
        info!("writing performance report to {}", self.path.display());

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let sample = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => tokio::select! {
                    _ = cancel.cancelled() => break,
                    sample = self.monitor.current_usage() => sample,
                },
            };

            let usage = match sample {
                Ok(usage) => usage,
                Err(e) => {
                    warn!("performance sample failed: {e}");
                    continue;
                }
            };

            let measured_at = Local::now().format("%Y-%m-%d %H:%M:%S");
            debug!("cpu={:.1}% mem={:.1}%", usage.cpu, usage.mem);

            let row = format!("{measured_at},{:.1},{:.1}\n", usage.cpu, usage.mem);
            file.write_all(row.as_bytes()).await?;
            file.flush().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        error::SampleError,
        resources::{Capacity, Usage},
    };

    /// Fails every other sample.
    #[derive(Default)]
    struct FlakyMonitor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ResourceMonitor for FlakyMonitor {
        async fn current_usage(&self) -> Result<Usage, SampleError> {
            if self.calls.fetch_add(1, Ordering::Relaxed) % 2 == 1 {
                return Err(SampleError::InvalidReading("cpu"));
            }
            Ok(Usage {
                cpu: 12.34,
                mem: 56.78,
            })
        }

        fn capacity(&self) -> Capacity {
            Capacity {
                logical_cores: 1,
                total_memory: 1,
            }
        }
    }

    #[tokio::test]
    async fn writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/performance.csv");

        let log = PerformanceLog::new(&path, Duration::from_millis(5), Arc::new(FlakyMonitor::default()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(log.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let report = std::fs::read_to_string(&path).unwrap();
        let mut lines = report.lines();
        assert_eq!(lines.next(), Some(HEADER.trim_end()));

        let rows: Vec<_> = lines.collect();
        assert!(!rows.is_empty());
        for row in rows {
            let fields: Vec<_> = row.split(',').collect();
            assert_eq!(fields.len(), 3);
            assert_eq!(fields[1], "12.3");
            assert_eq!(fields[2], "56.8");
        }
    }
}
