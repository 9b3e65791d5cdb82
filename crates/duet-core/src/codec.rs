//! Task codec, registered-function path.
//!
//! Closures are not serialized byte-for-byte: tasks that must genuinely
//! cross a boundary are modelled as a stable function id plus serializable
//! arguments. The common in-process case (a boxed closure moved directly to
//! a worker thread) lives in `duet-pool::task` instead; this module is what
//! lets a task be encoded to real bytes and later decoded and invoked, with
//! `decode_task(encode_task(t, a))(...a)` equivalent to `t(...a)` for
//! registered functions.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DuetError;

/// A function that can be looked up by id and invoked with JSON-encoded
/// positional arguments.
pub trait RegisteredFn: Send + Sync {
    fn call(&self, args: Vec<Value>) -> Result<Value, DuetError>;
}

impl<F> RegisteredFn for F
where
    F: Fn(Vec<Value>) -> Result<Value, DuetError> + Send + Sync,
{
    fn call(&self, args: Vec<Value>) -> Result<Value, DuetError> {
        self(args)
    }
}

fn registry() -> &'static RwLock<HashMap<String, Arc<dyn RegisteredFn>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, Arc<dyn RegisteredFn>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register a function under a stable id so it can later be referenced by
/// an [`EncodedTask`] produced (possibly elsewhere) by [`encode_task`].
pub fn register(id: impl Into<String>, f: impl RegisteredFn + 'static) {
    registry()
        .write()
        .expect("registry lock poisoned")
        .insert(id.into(), Arc::new(f));
}

/// Drop a previously registered function. Returns whether one was present.
pub fn unregister(id: &str) -> bool {
    registry()
        .write()
        .expect("registry lock poisoned")
        .remove(id)
        .is_some()
}

/// The decoded form of a task: a function id plus its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedTask {
    pub fn_id: String,
    pub args: Vec<Value>,
}

impl EncodedTask {
    /// Reconstruct and run the task, as `decode_task(bytes)(...args)` would.
    pub fn invoke(&self) -> Result<Value, DuetError> {
        let guard = registry().read().expect("registry lock poisoned");
        let f = guard.get(&self.fn_id).ok_or_else(|| {
            DuetError::Serialization(format!("no function registered for id {:?}", self.fn_id))
        })?;
        f.call(self.args.clone())
    }
}

/// Produce a self-contained byte representation of a registered-function
/// call. Fails with `SerializationError` only if the arguments themselves
/// are not JSON-representable (non-transportable captured values).
pub fn encode_task(fn_id: impl Into<String>, args: Vec<Value>) -> Result<Vec<u8>, DuetError> {
    let task = EncodedTask {
        fn_id: fn_id.into(),
        args,
    };
    serde_json::to_vec(&task).map_err(|e| DuetError::Serialization(e.to_string()))
}

/// Reconstruct an [`EncodedTask`] from bytes. Fails with
/// `SerializationError` on corruption.
pub fn decode_task(bytes: &[u8]) -> Result<EncodedTask, DuetError> {
    serde_json::from_slice(bytes).map_err(|e| DuetError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_invokes_registered_function() {
        register("codec-test::add", |args: Vec<Value>| {
            let a = args[0].as_i64().unwrap_or(0);
            let b = args[1].as_i64().unwrap_or(0);
            Ok(Value::from(a + b))
        });

        let bytes = encode_task("codec-test::add", vec![Value::from(5), Value::from(3)]).unwrap();
        let decoded = decode_task(&bytes).unwrap();
        assert_eq!(decoded.invoke().unwrap(), Value::from(8));
    }

    #[test]
    fn null_and_false_round_trip() {
        register("codec-test::identity", |args: Vec<Value>| {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        });

        for input in [Value::Null, Value::Bool(false)] {
            let bytes = encode_task("codec-test::identity", vec![input.clone()]).unwrap();
            let decoded = decode_task(&bytes).unwrap();
            assert_eq!(decoded.invoke().unwrap(), input);
        }
    }

    #[test]
    fn decode_corrupt_bytes_is_serialization_error() {
        let err = decode_task(b"not json").unwrap_err();
        assert!(matches!(err, DuetError::Serialization(_)));
    }

    #[test]
    fn invoking_unknown_id_is_serialization_error() {
        let bytes = encode_task("codec-test::does-not-exist", vec![]).unwrap();
        let decoded = decode_task(&bytes).unwrap();
        assert!(matches!(decoded.invoke(), Err(DuetError::Serialization(_))));
    }
}
