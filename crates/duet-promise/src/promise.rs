//! Single-assignment promise with chainable continuations.
//!
//! JS-shaped promises resolve with a dynamically-typed `x` that might be a
//! plain value, another promise, or a thenable; Rust's static typing can't
//! express that union directly, so the constructor's resolution rules are
//! split across concrete `Resolver` methods instead of one polymorphic
//! `resolve`. See `DESIGN.md` for the rationale. Everything
//! else — self-reference rejection, first-call-wins thenable chasing with a
//! guard flag, `then`/`catch`/`finally`/`timeout`, both `await` variants —
//! follows the classic promise state machine.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Notify};

use duet_core::{DuetError, DuetResult, ErrorRecord};

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
enum Settlement<T> {
    Fulfilled(T),
    Rejected(DuetError),
}

impl<T> Settlement<T> {
    fn into_result(self) -> DuetResult<T> {
        match self {
            Settlement::Fulfilled(v) => Ok(v),
            Settlement::Rejected(e) => Err(e),
        }
    }
}

enum State<T> {
    Pending,
    Settled(Settlement<T>),
}

struct PromiseInner<T> {
    id: u64,
    settled: AtomicBool,
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> PromiseInner<T> {
    fn settle(self: &Arc<Self>, settlement: Settlement<T>) {
        if self.settled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock().expect("promise state lock poisoned") = State::Settled(settlement);
        self.notify.notify_waiters();
    }
}

/// A party may interoperate with this promise family by implementing
/// `then` itself, rather than this crate probing for a duck-typed `then`
/// field.
pub trait Thenable<T>: Send + 'static {
    fn then(self, on_fulfilled: Box<dyn FnOnce(T) + Send>, on_rejected: Box<dyn FnOnce(DuetError) + Send>);
}

/// Handle passed to a `Promise::new` executor. Whichever resolution method
/// is called first wins; all later calls (on this handle or any clone of
/// it) are silently ignored.
pub struct Resolver<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Fulfill with a plain value.
    pub fn resolve(&self, value: T) {
        self.inner.settle(Settlement::Fulfilled(value));
    }

    /// `reject(r)` — immediate, no thenable chasing on reasons.
    pub fn reject(&self, reason: DuetError) {
        self.inner.settle(Settlement::Rejected(reason));
    }

    /// Adopt another promise's eventual state, unless it is this very
    /// promise, which rejects instead of deadlocking.
    pub fn resolve_with_promise(&self, other: Promise<T>) {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            self.reject(DuetError::SelfResolved);
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            match other.await_value().await {
                Ok(v) => this.resolve(v),
                Err(e) => this.reject(e),
            }
        });
    }

    /// Call `thenable.then(...)` at most once; only the first of
    /// `on_fulfilled`/`on_rejected` to fire is kept, via a oneshot sender
    /// shared between both callbacks. A panic inside `then` itself rejects
    /// with the panic payload if neither callback fired first. The whole
    /// chase is bounded by `Config::thenable_timeout`: a thenable that never
    /// invokes either callback rejects with `DuetError::Timeout` instead of
    /// hanging this promise forever.
    pub fn resolve_with_thenable<Th: Thenable<T>>(&self, thenable: Th) {
        let (tx, rx) = oneshot::channel::<Settlement<T>>();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let tx_ok = tx.clone();
        let tx_err = tx.clone();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            thenable.then(
                Box::new(move |v| {
                    if let Some(sender) = tx_ok.lock().expect("thenable sender lock poisoned").take() {
                        let _ = sender.send(Settlement::Fulfilled(v));
                    }
                }),
                Box::new(move |e| {
                    if let Some(sender) = tx_err.lock().expect("thenable sender lock poisoned").take() {
                        let _ = sender.send(Settlement::Rejected(e));
                    }
                }),
            );
        }));

        if let Err(payload) = outcome {
            if let Some(sender) = tx.lock().expect("thenable sender lock poisoned").take() {
                let _ = sender.send(Settlement::Rejected(DuetError::Task(ErrorRecord::from_panic(payload))));
            }
        }

        let this = self.clone();
        tokio::spawn(async move {
            let bound = duet_core::config::get_thenable_timeout();
            match tokio::time::timeout(bound, rx).await {
                Ok(Ok(Settlement::Fulfilled(v))) => this.resolve(v),
                Ok(Ok(Settlement::Rejected(e))) => this.reject(e),
                Ok(Err(_)) => {}
                Err(_elapsed) => this.reject(DuetError::Timeout),
            }
        });
    }
}

/// A single-assignment, chainable future value.
pub struct Promise<T> {
    inner: Arc<PromiseInner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    fn pending() -> Self {
        Self {
            inner: Arc::new(PromiseInner {
                id: NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                settled: AtomicBool::new(false),
                state: Mutex::new(State::Pending),
                notify: Notify::new(),
            }),
        }
    }

    fn resolver(&self) -> Resolver<T> {
        Resolver {
            inner: self.inner.clone(),
        }
    }

    /// `new Promise(executor)`: `executor` runs synchronously; a panic
    /// inside it (standing in for a thrown exception) rejects the promise
    /// with the captured payload.
    pub fn new(executor: impl FnOnce(Resolver<T>)) -> Self {
        let promise = Self::pending();
        let resolver = promise.resolver();
        let for_executor = resolver.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| executor(for_executor)));
        if let Err(payload) = outcome {
            let record = ErrorRecord::from_panic(payload);
            tracing::warn!(promise_id = promise.inner.id, message = %record.message, "executor panicked, rejecting");
            resolver.reject(DuetError::Task(record));
        }
        promise
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    fn try_peek(&self) -> Option<DuetResult<T>> {
        match &*self.inner.state.lock().expect("promise state lock poisoned") {
            State::Pending => None,
            State::Settled(settlement) => Some(settlement.clone().into_result()),
        }
    }

    /// Cooperative `await()`: suspends on the tokio scheduler, never
    /// busy-waits.
    pub async fn await_value(&self) -> DuetResult<T> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(result) = self.try_peek() {
                return result;
            }
            notified.await;
        }
    }

    /// Preemptive `await_blocking()`: exponential backoff poll between
    /// `Config::initial_poll_sleep` and `Config::max_poll_sleep`, for
    /// callers with no tokio runtime on the current thread.
    pub fn await_blocking(&self) -> DuetResult<T> {
        let cfg = duet_core::config::snapshot();
        let mut sleep = cfg.initial_poll_sleep;
        loop {
            if let Some(result) = self.try_peek() {
                return result;
            }
            std::thread::sleep(sleep);
            sleep = (sleep * 2).min(cfg.max_poll_sleep);
        }
    }

    /// `then(on_fulfilled)` narrowed to the common single-callback shape:
    /// transforms the fulfillment value, forwards rejections unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> DuetResult<U> + Send + 'static,
    {
        let source = self.clone();
        Promise::new(move |resolver| {
            tokio::spawn(async move {
                match source.await_value().await {
                    Ok(value) => match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_fulfilled(value))) {
                        Ok(Ok(out)) => resolver.resolve(out),
                        Ok(Err(e)) => resolver.reject(e),
                        Err(payload) => resolver.reject(DuetError::Task(ErrorRecord::from_panic(payload))),
                    },
                    Err(e) => resolver.reject(e),
                }
            });
        })
    }

    /// `catch(handler)` ≡ `then(null, handler)`: fulfillment passes through
    /// unchanged, rejection runs `handler` to recover (or re-reject).
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(DuetError) -> DuetResult<T> + Send + 'static,
    {
        let source = self.clone();
        Promise::new(move |resolver| {
            tokio::spawn(async move {
                match source.await_value().await {
                    Ok(value) => resolver.resolve(value),
                    Err(e) => match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| on_rejected(e))) {
                        Ok(Ok(out)) => resolver.resolve(out),
                        Ok(Err(e)) => resolver.reject(e),
                        Err(payload) => resolver.reject(DuetError::Task(ErrorRecord::from_panic(payload))),
                    },
                }
            });
        })
    }

    /// `finally(handler)`: runs on both outcomes, discards its own return
    /// value, but a failure (panic or error) overrides the outcome.
    pub fn finally<F>(&self, on_settle: F) -> Promise<T>
    where
        F: FnOnce() -> DuetResult<()> + Send + 'static,
    {
        let source = self.clone();
        Promise::new(move |resolver| {
            tokio::spawn(async move {
                let outcome = source.await_value().await;
                match std::panic::catch_unwind(std::panic::AssertUnwindSafe(on_settle)) {
                    Ok(Ok(())) => match outcome {
                        Ok(v) => resolver.resolve(v),
                        Err(e) => resolver.reject(e),
                    },
                    Ok(Err(e)) => resolver.reject(e),
                    Err(payload) => resolver.reject(DuetError::Task(ErrorRecord::from_panic(payload))),
                }
            });
        })
    }

    /// `timeout(ms)`: rejects with `DuetError::Timeout` if `self` has not
    /// settled within `duration`; the losing side is simply dropped by
    /// `tokio::select!`, which is this implementation's "timer cancelled
    /// when self settles" / "inner computation discarded on timeout".
    pub fn timeout(&self, duration: Duration) -> Promise<T> {
        let source = self.clone();
        Promise::new(move |resolver| {
            tokio::spawn(async move {
                tokio::select! {
                    outcome = source.await_value() => {
                        match outcome {
                            Ok(v) => resolver.resolve(v),
                            Err(e) => resolver.reject(e),
                        }
                    }
                    _ = tokio::time::sleep(duration) => {
                        resolver.reject(DuetError::Timeout);
                    }
                }
            });
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_plain_value() {
        let promise = Promise::new(|resolver| resolver.resolve(42));
        assert_eq!(promise.await_value().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn second_settlement_is_ignored() {
        let promise: Promise<i32> = Promise::new(|resolver| {
            resolver.resolve(1);
            resolver.resolve(2);
            resolver.reject(DuetError::Timeout);
        });
        assert_eq!(promise.await_value().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn executor_panic_becomes_rejection() {
        let promise: Promise<i32> = Promise::new(|_resolver| panic!("executor blew up"));
        let err = promise.await_value().await.unwrap_err();
        assert!(matches!(err, DuetError::Task(_)));
    }

    #[tokio::test]
    async fn self_resolution_rejects_with_type_error() {
        let promise: Promise<i32> = Promise::pending();
        let resolver = promise.resolver();
        let self_ref = promise.clone();
        resolver.resolve_with_promise(self_ref);
        let err = promise.await_value().await.unwrap_err();
        assert!(matches!(err, DuetError::SelfResolved));
    }

    #[tokio::test]
    async fn adopts_another_promises_state() {
        let inner = Promise::new(|resolver| resolver.resolve(7));
        let outer: Promise<i32> = Promise::new(move |resolver| resolver.resolve_with_promise(inner));
        assert_eq!(outer.await_value().await.unwrap(), 7);
    }

    struct EagerThenable(i32);
    impl Thenable<i32> for EagerThenable {
        fn then(self, on_fulfilled: Box<dyn FnOnce(i32) + Send>, _on_rejected: Box<dyn FnOnce(DuetError) + Send>) {
            on_fulfilled(self.0);
        }
    }

    #[tokio::test]
    async fn thenable_chasing_resolves() {
        let promise: Promise<i32> = Promise::new(|resolver| resolver.resolve_with_thenable(EagerThenable(9)));
        assert_eq!(promise.await_value().await.unwrap(), 9);
    }

    struct SilentThenable;
    impl Thenable<i32> for SilentThenable {
        fn then(self, _on_fulfilled: Box<dyn FnOnce(i32) + Send>, _on_rejected: Box<dyn FnOnce(DuetError) + Send>) {
            // never calls either callback
        }
    }

    #[tokio::test]
    async fn thenable_that_never_settles_times_out() {
        duet_core::config::set_thenable_timeout(Duration::from_millis(20));
        let promise: Promise<i32> = Promise::new(|resolver| resolver.resolve_with_thenable(SilentThenable));
        let err = promise.await_value().await.unwrap_err();
        assert!(matches!(err, DuetError::Timeout));
        duet_core::config::reset_config();
    }

    #[tokio::test]
    async fn then_transforms_fulfillment() {
        let promise = Promise::new(|resolver| resolver.resolve(4));
        let mapped = promise.then(|v| Ok(v * 10));
        assert_eq!(mapped.await_value().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn catch_recovers_rejection() {
        let promise: Promise<i32> = Promise::new(|resolver| resolver.reject(DuetError::Timeout));
        let recovered = promise.catch(|_err| Ok(-1));
        assert_eq!(recovered.await_value().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn finally_runs_on_both_outcomes_and_preserves_them() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let promise = Promise::new(|resolver| resolver.resolve(5));
        let observed = promise.finally(move || {
            ran_clone.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(observed.await_value().await.unwrap(), 5);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_rejects_when_inner_never_settles() {
        let never: Promise<i32> = Promise::pending();
        let timed = never.timeout(Duration::from_millis(20));
        let err = timed.await_value().await.unwrap_err();
        assert!(matches!(err, DuetError::Timeout));
    }

    #[tokio::test]
    async fn timeout_mirrors_self_when_it_settles_first() {
        let promise = Promise::new(|resolver| resolver.resolve(1));
        let timed = promise.timeout(Duration::from_secs(5));
        assert_eq!(timed.await_value().await.unwrap(), 1);
    }
}
