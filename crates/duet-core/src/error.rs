//! Library-wide error taxonomy.
//!
//! One variant per kind of failure the library surfaces. `Task` carries the
//! full structured record so a caller can inspect class/message/code/trace
//! without re-parsing a display string.

use crate::record::ErrorRecord;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DuetError {
    /// A captured value or task could not cross the isolation boundary.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A user task threw/panicked. Carries the structured record so
    /// `last_errors()` and `decode_error` can reconstruct it faithfully.
    #[error("task error: {}", .0.message)]
    Task(ErrorRecord),

    /// A batch exceeded `Config::max_task_timeout`.
    #[error("batch exceeded max_task_timeout")]
    BatchTimeout,

    /// No task completed within `Config::deadlock_detection_interval`.
    #[error("no progress within deadlock_detection_interval")]
    Deadlock,

    /// `execute` was called on a terminated pool.
    #[error("pool has been shut down")]
    PoolShutdown,

    /// The caller selected a substrate that is not available.
    #[error("substrate not supported: {0}")]
    AdapterUnsupported(String),

    /// `Promise::timeout` expired before the inner promise settled.
    #[error("promise timed out")]
    Timeout,

    /// `any()` rejected because every input promise rejected.
    #[error("{0}")]
    Aggregate(String),

    /// A promise was resolved with itself.
    #[error("a promise cannot be resolved with itself")]
    SelfResolved,
}

pub type DuetResult<T> = Result<T, DuetError>;

impl DuetError {
    /// The taxonomy class name used on the wire (`ErrorRecord::class`).
    pub fn class(&self) -> &'static str {
        match self {
            DuetError::Serialization(_) => "SerializationError",
            DuetError::Task(_) => "TaskError",
            DuetError::BatchTimeout => "BatchTimeout",
            DuetError::Deadlock => "Deadlock",
            DuetError::PoolShutdown => "PoolShutdown",
            DuetError::AdapterUnsupported(_) => "AdapterUnsupported",
            DuetError::Timeout => "Timeout",
            DuetError::Aggregate(_) => "AggregateError",
            DuetError::SelfResolved => "TypeError",
        }
    }

    /// Borrow the structured record when this is already a `Task` error.
    pub fn as_record(&self) -> Option<&ErrorRecord> {
        match self {
            DuetError::Task(record) => Some(record),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_match_taxonomy() {
        assert_eq!(DuetError::BatchTimeout.class(), "BatchTimeout");
        assert_eq!(DuetError::Deadlock.class(), "Deadlock");
        assert_eq!(DuetError::SelfResolved.class(), "TypeError");
    }

    #[test]
    fn task_error_preserves_record() {
        let record = ErrorRecord::new("MyError", "boom");
        let err = DuetError::Task(record.clone());
        assert_eq!(err.as_record(), Some(&record));
    }
}
