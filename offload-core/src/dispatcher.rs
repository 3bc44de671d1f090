//! Fixed-size worker pool for local (non-offloaded) solver work.
//!
//! Jobs are taken from a FIFO queue in submission order; completion order is
//! unspecified. Idle workers poll the queue, yielding between attempts.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::config::DispatchConfig;
use crate::error::{OffloadError, Result};

type Routine = Box<dyn FnOnce() + Send + 'static>;

/// One unit of local work. A job without a routine is a poison job: the
/// worker that receives it exits.
pub struct Job {
    id: u64,
    routine: Option<Routine>,
}

impl Job {
    pub fn new<F>(id: u64, routine: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            routine: Some(Box::new(routine)),
        }
    }

    pub fn poison() -> Self {
        Self {
            id: u64::MAX,
            routine: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_poison(&self) -> bool {
        self.routine.is_none()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("poison", &self.is_poison())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<Job>>,
    pending: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, VecDeque<Job>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    log::trace!("worker {} started", index);
    loop {
        let next = shared.queue().pop_front();
        let Some(job) = next else {
            thread::yield_now();
            continue;
        };
        let Job { id, routine } = job;
        let Some(routine) = routine else {
            log::trace!("worker {} received poison job", index);
            break;
        };
        if panic::catch_unwind(AssertUnwindSafe(routine)).is_err() {
            shared.panicked.fetch_add(1, Ordering::Relaxed);
            log::error!("job {} panicked on worker {}", id, index);
        }
        shared.completed.fetch_add(1, Ordering::Relaxed);
        shared.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct LocalJobDispatcher {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl LocalJobDispatcher {
    /// Starts `config.workers` threads.
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        if config.workers == 0 {
            return Err(OffloadError::InvalidConfiguration(
                "dispatcher needs at least one worker".to_string(),
            ));
        }
        let mut dispatcher = Self {
            shared: Arc::new(Shared::default()),
            workers: Vec::with_capacity(config.workers),
            next_id: AtomicU64::new(0),
        };
        for index in 0..config.workers {
            let shared = Arc::clone(&dispatcher.shared);
            // A spawn failure drops `dispatcher`, which retires the workers
            // already started.
            let handle = thread::Builder::new()
                .name(format!("offload-worker-{index}"))
                .spawn(move || worker_loop(shared, index))
                .map_err(|e| OffloadError::Dispatcher(format!("cannot spawn worker: {e}")))?;
            dispatcher.workers.push(handle);
        }
        log::info!("local dispatcher started with {} workers", config.workers);
        Ok(dispatcher)
    }

    /// Queues `job`. Poison jobs are reserved for [`shutdown`](Self::shutdown).
    pub fn submit(&self, job: Job) -> Result<()> {
        if job.is_poison() {
            return Err(OffloadError::Dispatcher(
                "poison jobs are only issued by shutdown".to_string(),
            ));
        }
        if self.workers.is_empty() {
            return Err(OffloadError::Dispatcher(
                "dispatcher is shut down".to_string(),
            ));
        }
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        self.shared.queue().push_back(job);
        Ok(())
    }

    /// Queues `routine` under a fresh job id and returns the id.
    pub fn spawn<F>(&self, routine: F) -> Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.submit(Job::new(id, routine))?;
        Ok(id)
    }

    /// Jobs submitted but not yet finished.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Jobs whose routine panicked. They also count as completed.
    pub fn panicked(&self) -> u64 {
        self.shared.panicked.load(Ordering::Relaxed)
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Spins until every submitted job has finished.
    pub fn wait_idle(&self) {
        while self.pending() > 0 {
            thread::yield_now();
        }
    }

    /// Sends one poison job per worker and joins them all. Jobs queued
    /// earlier still run first.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.workers.is_empty() {
            return Ok(());
        }
        {
            let mut queue = self.shared.queue();
            for _ in 0..self.workers.len() {
                queue.push_back(Job::poison());
            }
        }
        let mut failed = 0;
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                failed += 1;
            }
        }
        log::info!(
            "local dispatcher stopped after {} jobs",
            self.completed()
        );
        if failed > 0 {
            return Err(OffloadError::Dispatcher(format!(
                "{failed} worker threads terminated abnormally"
            )));
        }
        Ok(())
    }
}

impl Drop for LocalJobDispatcher {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("dispatcher shutdown failed: {}", err);
        }
    }
}
