//! Dispatch engine: turns `run`/`all`/`map`/`for_each`/`pool_run` calls
//! into batches against a pool, plus the chunking policy `map`/`for_each` use.
//!
//! The process-wide default pool is explicit, documented process-wide
//! state: a lazily-constructed, `RwLock`-guarded `Arc<WorkerPool>` that
//! gets rebuilt whenever it is missing or unhealthy.

use std::ops::Range;
use std::sync::{Arc, OnceLock, RwLock};

use duet_core::{DuetError, DuetResult};

use crate::pool::{create_pool, TaskBatch, WorkerPool};

static DEFAULT_POOL: OnceLock<RwLock<Option<Arc<WorkerPool>>>> = OnceLock::new();

fn default_pool_cell() -> &'static RwLock<Option<Arc<WorkerPool>>> {
    DEFAULT_POOL.get_or_init(|| RwLock::new(None))
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// The process-wide default pool, constructing or replacing it if missing
/// or no longer healthy.
pub fn default_pool() -> Arc<WorkerPool> {
    if let Some(pool) = default_pool_cell()
        .read()
        .expect("default pool lock poisoned")
        .as_ref()
    {
        if pool.is_healthy() {
            return pool.clone();
        }
    }

    let mut guard = default_pool_cell()
        .write()
        .expect("default pool lock poisoned");
    if let Some(pool) = guard.as_ref() {
        if pool.is_healthy() {
            return pool.clone();
        }
    }
    let pool = create_pool(default_worker_count());
    *guard = Some(pool.clone());
    pool
}

/// Terminate the process-wide default pool. The next call that needs one
/// builds it again from scratch.
pub async fn shutdown() {
    let existing = default_pool_cell()
        .write()
        .expect("default pool lock poisoned")
        .take();
    if let Some(pool) = existing {
        pool.shutdown(true).await;
    }
}

/// `run(task) → value`: single-item batch on the default pool, re-raising
/// the task's own error rather than containing it.
pub async fn run<T>(task: impl FnOnce() -> DuetResult<T> + Send + 'static) -> DuetResult<T>
where
    T: Send + 'static,
{
    let pool = default_pool();
    let mut batch: TaskBatch<usize, T> = TaskBatch::new();
    batch.insert(0, task);
    let mut results = pool.execute(batch).await?;
    results
        .swap_remove(&0)
        .expect("single-item batch always produces exactly one result")
}

/// `all(tasks) → [value…]`: unlike promise `all`, a per-task failure does
/// not abort the batch — it becomes `None` in that slot, with the detail
/// recoverable from [`WorkerPool::last_errors`].
pub async fn all<T>(tasks: Vec<Box<dyn FnOnce() -> DuetResult<T> + Send>>) -> DuetResult<Vec<Option<T>>>
where
    T: Send + 'static,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let pool = default_pool();
    let mut batch: TaskBatch<usize, T> = TaskBatch::new();
    for (i, task) in tasks.into_iter().enumerate() {
        batch.insert(i, move || task());
    }
    let len = batch.len();
    let mut results = pool.execute(batch).await?;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(match results.swap_remove(&i) {
            Some(Ok(value)) => Some(value),
            _ => None,
        });
    }
    Ok(out)
}

/// `pool_run(tasks, max_concurrency)`: like `all`, but on an ephemeral pool
/// sized `max_concurrency` and torn down afterward.
pub async fn pool_run<T>(
    tasks: Vec<Box<dyn FnOnce() -> DuetResult<T> + Send>>,
    max_concurrency: usize,
) -> DuetResult<Vec<Option<T>>>
where
    T: Send + 'static,
{
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let ephemeral = create_pool(max_concurrency);
    let mut batch: TaskBatch<usize, T> = TaskBatch::new();
    for (i, task) in tasks.into_iter().enumerate() {
        batch.insert(i, move || task());
    }
    let len = batch.len();
    let exec_result = ephemeral.execute(batch).await;
    ephemeral.shutdown(true).await;
    let mut results = exec_result?;
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(match results.swap_remove(&i) {
            Some(Ok(value)) => Some(value),
            _ => None,
        });
    }
    Ok(out)
}

/// Given `n` items and `workers` requested workers, produce `min(workers,
/// n)` near-equal, ceil-balanced, order-preserving ranges.
fn chunk_ranges(n: usize, workers: usize) -> Vec<Range<usize>> {
    let chunk_count = workers.min(n).max(1);
    let base = n / chunk_count;
    let extra = n % chunk_count;
    let mut ranges = Vec::with_capacity(chunk_count);
    let mut start = 0;
    for i in 0..chunk_count {
        let size = base + usize::from(i < extra);
        ranges.push(start..start + size);
        start += size;
    }
    ranges
}

/// `map(items, callback, workers?) → [value…]`: chunks `items` into
/// `workers` (default: CPU count) groups that preserve original indices;
/// each chunk runs as one task applying `callback` in order. A callback
/// failure fails its whole chunk (and the call), mirroring synchronous
/// `map` semantics rather than `all`'s per-slot containment.
pub async fn map<I, T, F>(items: Vec<I>, callback: F, workers: Option<usize>) -> DuetResult<Vec<T>>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> DuetResult<T> + Send + Sync + 'static,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let total = items.len();
    let worker_count = workers.unwrap_or_else(default_worker_count).max(1);
    let ranges = chunk_ranges(total, worker_count);
    let callback = Arc::new(callback);

    let mut remaining: Vec<Option<I>> = items.into_iter().map(Some).collect();
    let mut batch: TaskBatch<usize, Vec<(usize, T)>> = TaskBatch::new();
    for (chunk_idx, range) in ranges.into_iter().enumerate() {
        let mut chunk_items = Vec::with_capacity(range.len());
        for idx in range {
            let item = remaining[idx]
                .take()
                .expect("chunk ranges partition the input exactly once");
            chunk_items.push((idx, item));
        }
        let callback = callback.clone();
        batch.insert(chunk_idx, move || {
            let mut out = Vec::with_capacity(chunk_items.len());
            for (idx, item) in chunk_items {
                out.push((idx, callback(item)?));
            }
            Ok(out)
        });
    }

    let pool = default_pool();
    let results = pool.execute(batch).await?;

    let mut merged: Vec<Option<T>> = (0..total).map(|_| None).collect();
    for (_, chunk_result) in results {
        for (idx, value) in chunk_result? {
            merged[idx] = Some(value);
        }
    }

    Ok(merged
        .into_iter()
        .map(|slot| slot.expect("every original index is covered by exactly one chunk"))
        .collect())
}

/// `for_each(items, callback, workers)`: identical chunking to `map`, but
/// only side effects persist.
pub async fn for_each<I, F>(items: Vec<I>, callback: F, workers: Option<usize>) -> DuetResult<()>
where
    I: Send + 'static,
    F: Fn(I) -> DuetResult<()> + Send + Sync + 'static,
{
    map(items, callback, workers).await?;
    Ok(())
}
