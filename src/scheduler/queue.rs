use std::sync::Arc;

use tokio::sync::{
    mpsc::{self, error::TrySendError},
    Mutex,
};

use crate::{
    error::EnqueueError,
    protocol::{JobPayload, ResponseSender},
};

/// A parsed request waiting for a worker.
pub struct Job {
    pub payload: JobPayload,
    /// Where the response goes.
    pub reply: ResponseSender,
    /// How many times this job has been deferred and sent back to the tail.
    pub requeues: u32,
}

impl Job {
    pub fn new(payload: JobPayload, reply: ResponseSender) -> Self {
        Self {
            payload,
            reply,
            requeues: 0,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("payload", &self.payload)
            .field("requeues", &self.requeues)
            .finish_non_exhaustive()
    }
}

/// The bounded FIFO shared by every connection and worker.
///
/// Enqueueing never waits: a full queue hands the job back. Receiving waits for
/// the next job, one worker at a time, in arrival order.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobQueue {
    /// Creates a queue holding at most `capacity` jobs.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Puts `job` at the tail without waiting.
    ///
    /// # Returns
    /// `EnqueueError::Full` carrying the job back when the queue is at capacity.
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError<Job>> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) => EnqueueError::Full(job),
            TrySendError::Closed(job) => EnqueueError::Closed(job),
        })
    }

    /// Waits for the job at the head of the queue.
    ///
    /// # Returns
    /// `None` once the queue is closed and drained.
    pub async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }

    /// The fixed capacity.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Jobs currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
