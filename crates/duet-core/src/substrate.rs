//! Pluggable execution substrates (Strategy pattern).
//!
//! The pool and promise models can run atop different underlying
//! collaborators (thread pools, event loops). Here that is a
//! priority-ordered registry of named substrates; exactly one,
//! [`TOKIO_SUBSTRATE`], ships and is always available, so
//! `AdapterUnsupported` is reachable only when a caller names a substrate
//! that was never registered.

use std::sync::{OnceLock, RwLock};

use crate::error::DuetError;

/// A substrate usable by the worker pool.
pub trait PoolSubstrate: Send + Sync {
    fn name(&self) -> &'static str;
}

/// A substrate usable by the promise combinators.
pub trait PromiseSubstrate: Send + Sync {
    fn name(&self) -> &'static str;
}

/// The only substrate this crate ships: the `tokio` multi-thread runtime
/// for promises, real OS threads for pool workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSubstrate;

impl PoolSubstrate for TokioSubstrate {
    fn name(&self) -> &'static str {
        "tokio"
    }
}

impl PromiseSubstrate for TokioSubstrate {
    fn name(&self) -> &'static str {
        "tokio"
    }
}

pub static TOKIO_SUBSTRATE: TokioSubstrate = TokioSubstrate;

struct Registry<T: 'static> {
    entries: Vec<(&'static str, &'static T)>,
}

impl<T: 'static> Registry<T> {
    fn select(&self, name: &str) -> Result<&'static T, DuetError> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, s)| *s)
            .ok_or_else(|| {
                tracing::warn!(substrate = name, "substrate not registered");
                DuetError::AdapterUnsupported(name.to_string())
            })
    }
}

fn pool_registry() -> &'static RwLock<Registry<dyn PoolSubstrate>> {
    static REGISTRY: OnceLock<RwLock<Registry<dyn PoolSubstrate>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            entries: vec![("tokio", &TOKIO_SUBSTRATE as &dyn PoolSubstrate)],
        })
    })
}

fn promise_registry() -> &'static RwLock<Registry<dyn PromiseSubstrate>> {
    static REGISTRY: OnceLock<RwLock<Registry<dyn PromiseSubstrate>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            entries: vec![("tokio", &TOKIO_SUBSTRATE as &dyn PromiseSubstrate)],
        })
    })
}

/// Resolve a pool substrate by name, or `AdapterUnsupported` if unknown.
pub fn select_pool_substrate(name: &str) -> Result<&'static dyn PoolSubstrate, DuetError> {
    pool_registry()
        .read()
        .expect("substrate registry lock poisoned")
        .select(name)
}

/// Resolve a promise substrate by name, or `AdapterUnsupported` if unknown.
pub fn select_promise_substrate(name: &str) -> Result<&'static dyn PromiseSubstrate, DuetError> {
    promise_registry()
        .read()
        .expect("substrate registry lock poisoned")
        .select(name)
}
