//! Persistent parallel worker pool: a shared pull-queue of
//! real OS threads, a reusable pool type, the dispatch-level `run`/`all`/
//! `map`/`for_each`/`pool_run` operations, and process lifecycle.

pub mod dispatch;
pub mod gc;
pub mod lifecycle;
pub mod pool;
mod task;
mod worker;

pub use dispatch::{all, default_pool, for_each, map, pool_run, run, shutdown};
pub use lifecycle::{spawn_shutdown_handler, ShutdownController, ShutdownEvent};
pub use pool::{create_pool, BatchId, PoolState, TaskBatch, WorkerPool};
pub use task::{BoxedTask, TaskOutcome};
