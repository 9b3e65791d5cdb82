//! The worker pool itself: a long-lived, reusable set of OS threads a batch
//! of heterogeneous tasks can be `execute`d against.
//!
//! Shared state lives behind an `Arc`, with an explicit lifecycle and a
//! shutdown path that joins every worker thread; the actual queueing
//! discipline comes from [`crate::worker`].

use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use indexmap::IndexMap;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

use duet_core::{DuetError, DuetResult, ErrorRecord};

use crate::gc;
use crate::task::{BoxedTask, TaskOutcome};
use crate::worker::{self, QueueItem};

const FRESH: u8 = 0;
const SERVING: u8 = 1;
const DRAINING: u8 = 2;
const TERMINATED: u8 = 3;

const MAX_TRACKED_ERRORS: usize = 100;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Fresh,
    Serving,
    Draining,
    Terminated,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            FRESH => PoolState::Fresh,
            SERVING => PoolState::Serving,
            DRAINING => PoolState::Draining,
            _ => PoolState::Terminated,
        }
    }
}

static NEXT_BATCH_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one call to [`WorkerPool::execute`] for logging/tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId(u64);

impl BatchId {
    fn next() -> Self {
        Self(NEXT_BATCH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A set of jobs to run as one unit, keyed by either positional index or
/// an arbitrary associative key.
pub struct TaskBatch<K, T> {
    id: BatchId,
    entries: IndexMap<K, Box<dyn FnOnce() -> DuetResult<T> + Send>>,
}

impl<K, T> Default for TaskBatch<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> TaskBatch<K, T>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            id: BatchId::next(),
            entries: IndexMap::new(),
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn insert(&mut self, key: K, job: impl FnOnce() -> DuetResult<T> + Send + 'static) {
        self.entries.insert(key, Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> TaskBatch<usize, T> {
    /// Convenience constructor for the common positional-key case.
    pub fn from_vec(jobs: Vec<Box<dyn FnOnce() -> DuetResult<T> + Send>>) -> Self {
        let mut batch = Self::new();
        for (i, job) in jobs.into_iter().enumerate() {
            batch.entries.insert(i, job);
        }
        batch
    }
}

pub struct WorkerPool {
    sender: Sender<QueueItem>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    state: AtomicU8,
    pending: AtomicUsize,
    last_progress: Mutex<Instant>,
    errors: Mutex<IndexMap<String, ErrorRecord>>,
    worker_count: usize,
    completed_slots: AtomicU64,
}

impl WorkerPool {
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True while the pool is accepting work and every worker thread is
    /// still alive.
    pub fn is_healthy(&self) -> bool {
        if self.state() != PoolState::Serving {
            return false;
        }
        let workers = self.workers.lock().expect("worker list lock poisoned");
        !workers.is_empty() && workers.iter().all(|h| !h.is_finished())
    }

    /// Failed-slot original key (rendered via `Debug`) to structured error
    /// record, for the most recently completed `execute` call only: each
    /// call replaces this map rather than accumulating across batches.
    pub fn last_errors(&self) -> IndexMap<String, ErrorRecord> {
        self.errors.lock().expect("error map lock poisoned").clone()
    }

    /// Replace the last-batch error map with `errors`, capping retained
    /// entries at [`MAX_TRACKED_ERRORS`] (oldest-inserted dropped first).
    fn commit_errors(&self, mut batch_errors: IndexMap<String, ErrorRecord>) {
        while batch_errors.len() > MAX_TRACKED_ERRORS {
            batch_errors.shift_remove_index(0);
        }
        *self.errors.lock().expect("error map lock poisoned") = batch_errors;
    }

    /// Run every job in `batch` concurrently across the worker pool and
    /// collect results keyed the same way the batch was built, preserving
    /// insertion order: batch results never reorder keys.
    pub async fn execute<K, T>(&self, batch: TaskBatch<K, T>) -> DuetResult<IndexMap<K, DuetResult<T>>>
    where
        K: Eq + Hash + Clone + Debug + Send + 'static,
        T: Send + 'static,
    {
        let state = self.state();
        if state == PoolState::Terminated || state == PoolState::Draining {
            return Err(DuetError::PoolShutdown);
        }

        let cfg = duet_core::config::snapshot();
        let mut join_set: JoinSet<(K, Result<TaskOutcome, DuetError>)> = JoinSet::new();

        for (key, job) in batch.entries {
            let (reply_tx, reply_rx) = oneshot::channel();
            let boxed: BoxedTask = Box::new(move || -> TaskOutcome {
                job()
                    .map(|value| Box::new(value) as Box<dyn Any + Send>)
                    .map_err(|err| duet_core::encode_error(&err))
            });
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.sender
                .send(QueueItem {
                    task: boxed,
                    reply: reply_tx,
                })
                .map_err(|_| DuetError::PoolShutdown)?;
            join_set.spawn(async move {
                let outcome = reply_rx.await.map_err(|_| DuetError::PoolShutdown);
                (key, outcome)
            });
        }

        let mut results: IndexMap<K, DuetResult<T>> = IndexMap::new();
        let mut batch_errors: IndexMap<String, ErrorRecord> = IndexMap::new();
        let deadline = Instant::now() + cfg.max_task_timeout;

        while !join_set.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.commit_errors(batch_errors);
                return Err(DuetError::BatchTimeout);
            }
            let tick = cfg.deadlock_detection_interval.min(remaining);

            match tokio::time::timeout(tick, join_set.join_next()).await {
                Ok(Some(Ok((key, outcome)))) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    *self.last_progress.lock().expect("progress lock poisoned") = Instant::now();
                    let result = match outcome {
                        Ok(Ok(boxed_any)) => {
                            let value = *boxed_any
                                .downcast::<T>()
                                .expect("task result type mismatch within a single execute() call");
                            Ok(value)
                        }
                        Ok(Err(record)) => {
                            batch_errors.insert(format!("{key:?}"), record.clone());
                            Err(duet_core::decode_error(record))
                        }
                        Err(pool_shutdown) => Err(pool_shutdown),
                    };
                    results.insert(key, result);

                    let completed = self.completed_slots.fetch_add(1, Ordering::Relaxed) + 1;
                    if completed % cfg.gc_check_interval.max(1) == 0 {
                        gc::maybe_trim(cfg.memory_threshold_for_gc);
                    }
                }
                Ok(Some(Err(join_err))) => {
                    self.commit_errors(batch_errors);
                    return Err(DuetError::Task(ErrorRecord::new(
                        "JoinError",
                        join_err.to_string(),
                    )));
                }
                Ok(None) => break,
                Err(_elapsed) => {
                    self.commit_errors(batch_errors);
                    if Instant::now() >= deadline {
                        return Err(DuetError::BatchTimeout);
                    }
                    return Err(DuetError::Deadlock);
                }
            }
        }

        self.commit_errors(batch_errors);
        Ok(results)
    }

    /// Stop accepting new `execute` calls. When `drain` is true, waits up to
    /// [`DRAIN_TIMEOUT`] for in-flight tasks to finish before joining worker
    /// threads; a task still outstanding past that bound is abandoned rather
    /// than holding up shutdown, and the workers get reaped regardless.
    /// Otherwise workers exit as soon as their current task (if any)
    /// completes.
    pub async fn shutdown(&self, drain: bool) {
        let target = if drain { DRAINING } else { TERMINATED };
        let prev = self.state.swap(target, Ordering::SeqCst);
        if prev == TERMINATED {
            return;
        }

        if drain {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            while self.pending.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        let handles = {
            let mut workers = self.workers.lock().expect("worker list lock poisoned");
            std::mem::take(&mut *workers)
        };
        let _ = tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await;
        self.state.store(TERMINATED, Ordering::SeqCst);
    }
}

/// Build a pool of `worker_count` threads, blocking until every worker has
/// cleared its startup barrier: callers never observe a pool with workers
/// still booting.
pub fn create_pool(worker_count: usize) -> Arc<WorkerPool> {
    let worker_count = worker_count.max(1);
    let (sender, receiver) = crossbeam_channel::unbounded();
    let shutdown = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(worker_count + 1));

    let handles = (0..worker_count)
        .map(|id| worker::spawn_worker(id, receiver.clone(), shutdown.clone(), barrier.clone()))
        .collect();
    barrier.wait();

    Arc::new(WorkerPool {
        sender,
        shutdown,
        workers: Mutex::new(handles),
        state: AtomicU8::new(SERVING),
        pending: AtomicUsize::new(0),
        last_progress: Mutex::new(Instant::now()),
        errors: Mutex::new(IndexMap::new()),
        worker_count,
        completed_slots: AtomicU64::new(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_preserves_keys_and_values() {
        let pool = create_pool(2);
        let mut batch: TaskBatch<&'static str, i32> = TaskBatch::new();
        batch.insert("a", || Ok(1));
        batch.insert("b", || Ok(2));
        batch.insert("c", || Ok(3));

        let results = pool.execute(batch).await.unwrap();
        assert_eq!(*results.get("a").unwrap().as_ref().unwrap(), 1);
        assert_eq!(*results.get("b").unwrap().as_ref().unwrap(), 2);
        assert_eq!(*results.get("c").unwrap().as_ref().unwrap(), 3);
        assert_eq!(results.keys().collect::<Vec<_>>(), vec![&"a", &"b", &"c"]);

        pool.shutdown(true).await;
    }

    #[tokio::test]
    async fn execute_continues_past_individual_task_errors() {
        let pool = create_pool(2);
        let mut batch: TaskBatch<usize, i32> = TaskBatch::new();
        batch.insert(0, || Ok(10));
        batch.insert(1, || Err(DuetError::Task(ErrorRecord::new("Boom", "nope"))));
        batch.insert(2, || Ok(30));

        let results = pool.execute(batch).await.unwrap();
        assert_eq!(*results.get(&0).unwrap().as_ref().unwrap(), 10);
        assert!(results.get(&1).unwrap().is_err());
        assert_eq!(*results.get(&2).unwrap().as_ref().unwrap(), 30);

        let errors = pool.last_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.get("1").unwrap().message, "nope");

        pool.shutdown(true).await;
    }

    #[tokio::test]
    async fn last_errors_reflects_only_the_most_recent_batch() {
        let pool = create_pool(1);

        let mut failing: TaskBatch<usize, i32> = TaskBatch::new();
        failing.insert(0, || Err(DuetError::Task(ErrorRecord::new("Boom", "first"))));
        pool.execute(failing).await.unwrap();
        assert_eq!(pool.last_errors().len(), 1);

        let mut clean: TaskBatch<usize, i32> = TaskBatch::new();
        clean.insert(0, || Ok(1));
        pool.execute(clean).await.unwrap();
        assert!(pool.last_errors().is_empty());

        pool.shutdown(true).await;
    }

    #[tokio::test]
    async fn execute_after_shutdown_is_pool_shutdown_error() {
        let pool = create_pool(1);
        pool.shutdown(false).await;

        let mut batch: TaskBatch<usize, i32> = TaskBatch::new();
        batch.insert(0, || Ok(1));
        let err = pool.execute(batch).await.unwrap_err();
        assert!(matches!(err, DuetError::PoolShutdown));
    }

    #[tokio::test]
    async fn panicking_task_is_captured_as_task_error() {
        let pool = create_pool(1);
        let mut batch: TaskBatch<usize, i32> = TaskBatch::new();
        batch.insert(0, || panic!("kaboom"));

        let results = pool.execute(batch).await.unwrap();
        let err = results.get(&0).unwrap().as_ref().unwrap_err();
        assert!(matches!(err, DuetError::Task(_)));

        pool.shutdown(true).await;
    }
}
