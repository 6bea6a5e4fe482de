use std::sync::Arc;

use super::{Capacity, HistoryStore};

/// Predicted marginal cost of one job, in percent of the host and seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceEstimate {
    pub cpu: f64,
    pub mem: f64,
    pub seconds: f64,
}

impl ResourceEstimate {
    /// Used when no history matches, low enough that unseen job shapes are never held back.
    pub const FALLBACK: Self = Self {
        cpu: 0.01,
        mem: 0.01,
        seconds: 0.1,
    };
}

/// Predicts job costs from past runs.
#[derive(Clone)]
pub struct Estimator {
    history: Arc<dyn HistoryStore>,
    capacity: Capacity,
}

impl Estimator {
    /// Creates a new `Estimator`.
    ///
    /// # Arguments
    /// * `history` - Where past runs are looked up.
    /// * `capacity` - Host totals used to express costs as percentages.
    pub fn new(history: Arc<dyn HistoryStore>, capacity: Capacity) -> Self {
        Self { history, capacity }
    }

    /// Estimates the cost of reconstructing `signal` with `model`.
    ///
    /// The most recent matching history entry wins. Nothing is cached.
    ///
    /// # Returns
    /// The estimate, or `ResourceEstimate::FALLBACK` when nothing matches.
    pub async fn estimate(&self, model: &str, signal: &str) -> ResourceEstimate {
        let Some(entry) = self.history.lookup(model, signal).await.pop() else {
            return ResourceEstimate::FALLBACK;
        };

        let cores = self.capacity.logical_cores.max(1) as f64;
        let total = self.capacity.total_memory.max(1) as f64;

        ResourceEstimate {
            cpu: entry.cpu_used / cores,
            mem: entry.mem_used_bytes as f64 / total * 100.0,
            seconds: entry.time,
        }
    }
}
