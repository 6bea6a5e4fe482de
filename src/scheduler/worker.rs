use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::{
    admission::{admit, Admission, Limits},
    Job, JobQueue, Pipeline,
};
use crate::{
    error::EnqueueError,
    resources::{Estimator, ResourceEstimate, ResourceMonitor},
};

/// Gate and requeue settings shared by every worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GatePolicy {
    pub limits: Limits,
    pub max_defer: Duration,
    pub max_requeues: Option<u32>,
    pub sample_retry: Duration,
}

/// One long-lived consumer of the job queue.
pub(crate) struct Worker {
    id: usize,
    queue: JobQueue,
    monitor: Arc<dyn ResourceMonitor>,
    estimator: Estimator,
    pipeline: Pipeline,
    policy: GatePolicy,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: JobQueue,
        monitor: Arc<dyn ResourceMonitor>,
        estimator: Estimator,
        pipeline: Pipeline,
        policy: GatePolicy,
    ) -> Self {
        Self {
            id,
            queue,
            monitor,
            estimator,
            pipeline,
            policy,
        }
    }

    /// Drains the queue until `cancel` fires.
    ///
    /// A job that could not be gated because sampling failed stays with this worker
    /// and is retried before anything else is dequeued. Cancellation is only observed
    /// between jobs; a running solve always finishes.
    pub async fn run(self, cancel: CancellationToken) {
        let mut held: Option<Job> = None;

        loop {
            let job = match held.take() {
                Some(job) => job,
                None => tokio::select! {
                    _ = cancel.cancelled() => break,
                    job = self.queue.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                },
            };

            let usage = tokio::select! {
                _ = cancel.cancelled() => break,
                usage = self.monitor.current_usage() => usage,
            };

            let usage = match usage {
                Ok(usage) => usage,
                Err(e) => {
                    warn!("worker {}: resource sampling failed, holding job: {e}", self.id);
                    held = Some(job);
                    if sleep_or_cancel(self.policy.sample_retry, &cancel).await {
                        break;
                    }
                    continue;
                }
            };

            let estimate = self
                .estimator
                .estimate(&job.payload.model, &job.payload.signal)
                .await;

            debug!(
                worker = self.id, idx = job.payload.idx;
                "gate: cpu {:.2}+{:.2}/{} mem {:.2}+{:.2}/{}",
                usage.cpu, estimate.cpu, self.policy.limits.cpu,
                usage.mem, estimate.mem, self.policy.limits.mem
            );

            match admit(usage, &estimate, self.policy.limits) {
                Admission::Admit => {
                    let (user, idx) = (job.payload.username.clone(), job.payload.idx);
                    if let Err(e) = self.pipeline.process(job).await {
                        warn!("worker {}: job aborted: user={user} idx={idx}: {e}", self.id);
                    }
                }
                Admission::Defer { cpu, mem } => {
                    if self.defer(job, &estimate, cpu, mem, &cancel).await {
                        break;
                    }
                }
            }
        }

        debug!("worker {} stopped", self.id);
    }

    /// Waits out the estimated run time of an over-budget job, then puts it back at the tail.
    ///
    /// # Returns
    /// Whether the worker was cancelled while waiting. The job is still requeued in that case.
    async fn defer(
        &self,
        mut job: Job,
        estimate: &ResourceEstimate,
        cpu: bool,
        mem: bool,
        cancel: &CancellationToken,
    ) -> bool {
        job.requeues += 1;
        let (user, idx) = (job.payload.username.clone(), job.payload.idx);

        if let Some(max) = self.policy.max_requeues {
            if job.requeues > max {
                warn!("job lost: user={user} idx={idx} deferred more than {max} times");
                return false;
            }
        }

        warn!(
            "deferring job: user={user} idx={idx} cpu_over={cpu} mem_over={mem} requeues={}",
            job.requeues
        );

        let cancelled = sleep_or_cancel(defer_for(estimate, self.policy.max_defer), cancel).await;

        match self.queue.try_enqueue(job) {
            Ok(()) => info!("job requeued: user={user} idx={idx}"),
            Err(EnqueueError::Full(_)) => {
                warn!("job lost: user={user} idx={idx} queue full on requeue")
            }
            Err(EnqueueError::Closed(_)) => {
                error!("job lost: user={user} idx={idx} queue closed on requeue")
            }
        }

        cancelled
    }
}

/// How long to hold a deferred job: its estimated run time, capped at `max`.
fn defer_for(estimate: &ResourceEstimate, max: Duration) -> Duration {
    // `f64::min` ignores a NaN estimate, a negative one fails the conversion.
    Duration::try_from_secs_f64(estimate.seconds.min(max.as_secs_f64())).unwrap_or(Duration::ZERO)
}

/// Returns `true` if `cancel` fired before `duration` elapsed.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
