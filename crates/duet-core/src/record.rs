//! Structured, language-neutral error record and the
//! `encode_error`/`decode_error`/`is_error` operations that move errors
//! across the worker/pool isolation boundary.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::DuetError;

/// Shape that must round-trip across the isolation boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Always `true`; present so a generic JSON payload can be recognised
    /// as an error by `is_error` without knowing its shape in advance.
    pub error: bool,
    pub class: String,
    pub message: String,
    pub code: i64,
    pub file: String,
    pub line: u32,
    pub trace: String,
}

impl ErrorRecord {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: true,
            class: class.into(),
            message: message.into(),
            code: 0,
            file: String::new(),
            line: 0,
            trace: String::new(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }

    pub fn with_location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = file.into();
        self.line = line;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    /// Build a record from a caught `std::panic` payload. Never panics
    /// itself, regardless of what the task panicked with.
    #[track_caller]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "task panicked with a non-string payload".to_string()
        };
        let loc = std::panic::Location::caller();
        ErrorRecord::new("Panic", message).with_location(loc.file(), loc.line())
    }
}

/// Encode a [`DuetError`] into its structured record. Never throws: every
/// variant has a deterministic mapping, including `Task` which already
/// carries its own record.
#[track_caller]
pub fn encode_error(err: &DuetError) -> ErrorRecord {
    if let Some(record) = err.as_record() {
        return record.clone();
    }
    let loc = std::panic::Location::caller();
    ErrorRecord::new(err.class(), err.to_string()).with_location(loc.file(), loc.line())
}

/// Reconstruct a [`DuetError`] from a record. Known taxonomy classes map
/// back to their concrete variant; anything else (including records that
/// crossed from another process/language and name an unknown class)
/// becomes a generic `Task` error preserving the original message.
pub fn decode_error(record: ErrorRecord) -> DuetError {
    match record.class.as_str() {
        "SerializationError" => DuetError::Serialization(record.message),
        "BatchTimeout" => DuetError::BatchTimeout,
        "Deadlock" => DuetError::Deadlock,
        "PoolShutdown" => DuetError::PoolShutdown,
        "AdapterUnsupported" => DuetError::AdapterUnsupported(record.message),
        "Timeout" => DuetError::Timeout,
        "AggregateError" => DuetError::Aggregate(record.message),
        "TypeError" => DuetError::SelfResolved,
        _ => DuetError::Task(record),
    }
}

/// Cheap discriminator on a generic JSON result payload.
pub fn is_error(value: &serde_json::Value) -> bool {
    value
        .get("error")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_classes() {
        for err in [
            DuetError::BatchTimeout,
            DuetError::Deadlock,
            DuetError::PoolShutdown,
            DuetError::Timeout,
            DuetError::SelfResolved,
        ] {
            let record = encode_error(&err);
            let decoded = decode_error(record);
            assert_eq!(decoded.class(), err.class());
        }
    }

    #[test]
    fn unknown_class_becomes_task_error() {
        let record = ErrorRecord::new("Acme\\WeirdException", "custom failure");
        let decoded = decode_error(record.clone());
        match decoded {
            DuetError::Task(rec) => assert_eq!(rec, record),
            other => panic!("expected Task error, got {other:?}"),
        }
    }

    #[test]
    fn is_error_discriminates() {
        let record = ErrorRecord::new("X", "y");
        let value = serde_json::to_value(&record).unwrap();
        assert!(is_error(&value));
        assert!(!is_error(&serde_json::json!({"ok": true})));
    }

    #[test]
    fn from_panic_never_panics_on_opaque_payload() {
        let payload: Box<dyn Any + Send> = Box::new(42i32);
        let record = ErrorRecord::from_panic(payload);
        assert_eq!(record.class, "Panic");
        assert!(record.message.contains("non-string"));
    }
}
