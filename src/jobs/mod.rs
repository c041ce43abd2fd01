//! CPU Job System
//!
//! A small work-stealing pool for coarse CPU jobs. Work is grouped into
//! [`JobGroup`]s:
//!
//! - [`JobGroup::execute_jobs`] dispatches the group and waits
//!   *cooperatively* — the calling thread keeps pulling other jobs off the
//!   shared queue while it waits, so nested groups never deadlock the pool.
//! - [`JobGroup::execute_jobs_async`] dispatches and returns a
//!   [`JobNotifier`] which fires when every job in the group has finished.
//!
//! Threads outside the pool that need to wait on an atomic flag from
//! another pipeline stage call [`JobSystem::try_execute_job`] in their
//! busy-wait loop for the same reason.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

type Job = Box<dyn FnOnce() + Send + 'static>;

// ============================================================================
// JobSystem
// ============================================================================

struct JobSystemInner {
    sender: flume::Sender<Job>,
    receiver: flume::Receiver<Job>,
    shutdown: AtomicBool,
}

/// Shared handle to the worker pool.
///
/// Cloning is cheap. Dropping the last external handle does not stop the
/// workers; call [`shutdown`](Self::shutdown) for a deterministic
/// teardown (remaining queued jobs are still drained first).
#[derive(Clone)]
pub struct JobSystem {
    inner: Arc<JobSystemInner>,
}

impl JobSystem {
    /// Spawns a pool with one worker per available hardware thread.
    #[must_use]
    pub fn new() -> Self {
        let worker_count = std::thread::available_parallelism()
            .map(std::num::NonZero::get)
            .unwrap_or(4);
        Self::with_worker_count(worker_count)
    }

    /// Spawns a pool with an explicit worker count.
    #[must_use]
    pub fn with_worker_count(worker_count: usize) -> Self {
        let (sender, receiver) = flume::unbounded::<Job>();
        let inner = Arc::new(JobSystemInner {
            sender,
            receiver,
            shutdown: AtomicBool::new(false),
        });

        for index in 0..worker_count.max(1) {
            let worker_inner = Arc::clone(&inner);
            std::thread::Builder::new()
                .name(format!("forge-worker-{index}"))
                .spawn(move || worker_loop(&worker_inner))
                .expect("failed to spawn job system worker");
        }

        log::debug!("Job system started with {} worker(s)", worker_count.max(1));

        Self { inner }
    }

    /// Enqueues a single detached job.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        // Send only fails after every receiver is gone, which cannot
        // happen while `inner` is alive.
        let _ = self.inner.sender.send(Box::new(job));
    }

    /// Runs one queued job on the calling thread, if any is available.
    ///
    /// Returns `true` if a job was executed. Waiting loops call this so
    /// that blocked threads contribute to draining the queue.
    pub fn try_execute_job(&self) -> bool {
        match self.inner.receiver.try_recv() {
            Ok(job) => {
                job();
                true
            }
            Err(_) => false,
        }
    }

    /// Signals the workers to exit once the queue runs dry.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
    }

    /// Creates an empty job group bound to this pool.
    #[must_use]
    pub fn create_group(&self) -> JobGroup {
        JobGroup {
            system: self.clone(),
            jobs: Vec::new(),
        }
    }
}

impl Default for JobSystem {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(inner: &JobSystemInner) {
    loop {
        match inner
            .receiver
            .recv_timeout(std::time::Duration::from_millis(50))
        {
            Ok(job) => job(),
            Err(flume::RecvTimeoutError::Timeout) => {
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => return,
        }
    }
}

// ============================================================================
// JobGroup
// ============================================================================

/// Completion handle for an asynchronously dispatched group.
#[derive(Clone)]
pub struct JobNotifier {
    remaining: Arc<AtomicUsize>,
}

impl JobNotifier {
    /// `true` once every job in the group has run to completion.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Waits for the group, stealing queued work while blocked.
    pub fn wait(&self, system: &JobSystem) {
        while !self.is_finished() {
            if !system.try_execute_job() {
                std::thread::yield_now();
            }
        }
    }
}

/// Guard that marks a job finished even if it panics; a wedged notifier
/// would otherwise hang every cooperative waiter.
struct CompletionGuard {
    remaining: Arc<AtomicUsize>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.remaining.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A batch of jobs dispatched and awaited together.
pub struct JobGroup {
    system: JobSystem,
    jobs: Vec<Job>,
}

impl JobGroup {
    /// Pre-allocates space for `count` jobs.
    pub fn reserve(&mut self, count: usize) {
        self.jobs.reserve(count);
    }

    /// Adds a job to the group. Nothing runs until the group is executed.
    pub fn add_job(&mut self, job: impl FnOnce() + Send + 'static) {
        self.jobs.push(Box::new(job));
    }

    /// Number of jobs currently in the group.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Dispatches every job and returns immediately.
    pub fn execute_jobs_async(self) -> JobNotifier {
        let remaining = Arc::new(AtomicUsize::new(self.jobs.len()));

        for job in self.jobs {
            let guard = CompletionGuard {
                remaining: Arc::clone(&remaining),
            };
            self.system.submit(move || {
                let _guard = guard;
                job();
            });
        }

        JobNotifier { remaining }
    }

    /// Dispatches every job and waits for the group cooperatively.
    pub fn execute_jobs(self) {
        let system = self.system.clone();
        let notifier = self.execute_jobs_async();
        notifier.wait(&system);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_jobs_runs_everything() {
        let system = JobSystem::with_worker_count(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut group = system.create_group();
        group.reserve(32);
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            group.add_job(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        group.execute_jobs();
        assert_eq!(counter.load(Ordering::Relaxed), 32);
        system.shutdown();
    }

    #[test]
    fn test_async_notifier_fires() {
        let system = JobSystem::with_worker_count(2);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut group = system.create_group();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            group.add_job(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        let notifier = group.execute_jobs_async();
        notifier.wait(&system);
        assert!(notifier.is_finished());
        assert_eq!(counter.load(Ordering::Relaxed), 8);
        system.shutdown();
    }

    #[test]
    fn test_nested_groups_do_not_deadlock() {
        // One worker: the outer group's cooperative wait must execute the
        // inner group's jobs itself.
        let system = JobSystem::with_worker_count(1);
        let counter = Arc::new(AtomicUsize::new(0));

        let mut outer = system.create_group();
        {
            let system = system.clone();
            let counter = Arc::clone(&counter);
            outer.add_job(move || {
                let mut inner = system.create_group();
                for _ in 0..4 {
                    let counter = Arc::clone(&counter);
                    inner.add_job(move || {
                        counter.fetch_add(1, Ordering::Relaxed);
                    });
                }
                inner.execute_jobs();
            });
        }

        outer.execute_jobs();
        assert_eq!(counter.load(Ordering::Relaxed), 4);
        system.shutdown();
    }
}
