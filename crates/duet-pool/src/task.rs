//! Type-erased task representation that lets one long-lived [`crate::pool::WorkerPool`]
//! serve calls with different result types `T` across its lifetime.

use std::any::Any;

use duet_core::ErrorRecord;

/// What a worker sends back after running a task: the type-erased success
/// value, or the structured record describing why it failed.
pub type TaskOutcome = Result<Box<dyn Any + Send>, ErrorRecord>;

/// A unit of work a worker thread can run to completion without knowing
/// anything about `T` ahead of time.
pub type BoxedTask = Box<dyn FnOnce() -> TaskOutcome + Send>;
