//! Admission controlled scheduling.
//!
//! Connections push jobs into one bounded queue without waiting. A fixed pool of
//! workers drains it, and each job is gated on live host usage plus its estimated
//! cost before it runs. Jobs that do not fit are held back briefly and sent to the
//! tail of the queue.

mod admission;
mod pipeline;
pub(crate) mod queue;
mod worker;

use std::{sync::Arc, time::Duration};

use log::{error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::resources::{Estimator, HistoryStore, ResourceMonitor};

pub use admission::{admit, Admission, Limits};
pub use pipeline::Pipeline;
pub use queue::{Job, JobQueue};

use worker::{GatePolicy, Worker};

/// Pool and gate settings, fixed at startup.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub limits: Limits,
    /// Upper bound on how long a deferred job is held before it is requeued.
    pub max_defer: Duration,
    /// Deferrals allowed per job before it is dropped. `None` never drops.
    pub max_requeues: Option<u32>,
    /// Wait before retrying a failed resource sample.
    pub sample_retry: Duration,
}

/// The job queue and the worker pool draining it.
pub struct Scheduler {
    queue: JobQueue,
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates the queue and spawns `cfg.workers` workers on the current runtime.
    ///
    /// # Arguments
    /// * `cfg` - Pool and gate settings.
    /// * `monitor` - Live host usage.
    /// * `history` - Past run costs, used for estimates.
    /// * `pipeline` - What admitted jobs run through.
    pub fn start(
        cfg: SchedulerConfig,
        monitor: Arc<dyn ResourceMonitor>,
        history: Arc<dyn HistoryStore>,
        pipeline: Pipeline,
    ) -> Self {
        let queue = JobQueue::bounded(cfg.queue_capacity);
        let cancel = CancellationToken::new();
        let estimator = Estimator::new(history, monitor.capacity());
        let policy = GatePolicy {
            limits: cfg.limits,
            max_defer: cfg.max_defer,
            max_requeues: cfg.max_requeues,
            sample_retry: cfg.sample_retry,
        };

        let mut workers = JoinSet::new();
        for id in 0..cfg.workers {
            let worker = Worker::new(
                id,
                queue.clone(),
                Arc::clone(&monitor),
                estimator.clone(),
                pipeline.clone(),
                policy,
            );
            workers.spawn(worker.run(cancel.child_token()));
        }

        info!(
            "scheduler started: workers={} queue_capacity={}",
            cfg.workers, cfg.queue_capacity
        );

        Self {
            queue,
            workers,
            cancel,
        }
    }

    /// A handle connections use to enqueue jobs.
    pub fn submitter(&self) -> JobQueue {
        self.queue.clone()
    }

    /// Stops the pool.
    ///
    /// Idle workers exit at once. Workers in the middle of a job finish it first.
    /// Jobs still queued are dropped.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                error!("worker task failed: {e}");
            }
        }

        info!("scheduler stopped: {} jobs left in queue", self.queue.len());
    }
}
