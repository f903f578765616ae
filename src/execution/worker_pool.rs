//! Fixed worker pool over a bounded task queue
//!
//! Workers pull jobs from a bounded multi-producer/multi-consumer queue. A
//! producer that finds the queue full gets its job back and is expected to run
//! it on its own thread.

use crate::error::{QueryError, Result};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A unit of work; receives the id of the worker running it
pub type Job = Box<dyn FnOnce(usize) + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    worker_count: usize,
    queue_capacity: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl WorkerPool {
    /// Start `worker_count` threads sharing a queue of `queue_capacity` jobs
    pub fn try_new(worker_count: usize, queue_capacity: usize) -> Result<Self> {
        if worker_count == 0 || queue_capacity == 0 {
            return Err(QueryError::InvalidArgument(
                "worker pool needs at least one worker and one queue slot".to_string(),
            ));
        }

        let (sender, receiver) = channel::bounded::<Job>(queue_capacity);
        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("wide-scan-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, receiver))?;
            handles.push(handle);
        }

        debug!(worker_count, queue_capacity, "worker pool started");
        Ok(Self {
            sender: Some(sender),
            handles,
            worker_count,
            queue_capacity,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Id handed to jobs that run on a submitting thread instead of a worker
    pub fn owner_id(&self) -> usize {
        self.worker_count
    }

    /// Publish a job without blocking; the job comes back if the queue is full
    pub fn try_submit(&self, job: Job) -> std::result::Result<(), Job> {
        match &self.sender {
            Some(sender) => match sender.try_send(job) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(job)) | Err(TrySendError::Disconnected(job)) => Err(job),
            },
            None => Err(job),
        }
    }
}

fn run_worker(worker_id: usize, receiver: Receiver<Job>) {
    for job in receiver.iter() {
        if panic::catch_unwind(AssertUnwindSafe(|| job(worker_id))).is_err() {
            warn!(worker_id, "job panicked outside of frame reduction");
        }
    }
    debug!(worker_id, "worker stopped");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // closing the channel lets workers drain the queue and exit
        self.sender.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
