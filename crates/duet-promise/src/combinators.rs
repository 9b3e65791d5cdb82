//! Promise combinators: `all`/`race`/`all_settled`/`any`/`delay`/
//! `resolve`/`reject`/`map`, preserving original keys and never mutating
//! their inputs.
//!
//! Built on `tokio::task::JoinSet` for fan-in rather than a hand-rolled
//! poll loop.

use std::hash::Hash;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::task::JoinSet;

use duet_core::{DuetError, DuetResult, ErrorRecord};

use crate::promise::Promise;

/// One slot of an `all_settled` result: either the fulfilled value or the
/// rejection reason, never both.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Fulfilled(T),
    Rejected(DuetError),
}

fn key_order<K: Clone, T>(promises: &IndexMap<K, Promise<T>>) -> Vec<K> {
    promises.keys().cloned().collect()
}

/// `all(ps)`: resolves with every value in original key order when all
/// fulfill; rejects with the first rejection reason observed. Empty input
/// resolves with an empty map.
pub async fn all<K, T>(promises: IndexMap<K, Promise<T>>) -> DuetResult<IndexMap<K, T>>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    if promises.is_empty() {
        return Ok(IndexMap::new());
    }
    let order = key_order(&promises);

    let mut join_set = JoinSet::new();
    for (key, promise) in promises {
        join_set.spawn(async move { (key, promise.await_value().await) });
    }

    let mut values: IndexMap<K, T> = IndexMap::new();
    let mut first_err: Option<DuetError> = None;
    while let Some(joined) = join_set.join_next().await {
        let (key, outcome) = joined.expect("combinator tasks never panic");
        match outcome {
            Ok(value) => {
                values.insert(key, value);
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    let mut ordered = IndexMap::with_capacity(order.len());
    for key in order {
        if let Some(value) = values.swap_remove(&key) {
            ordered.insert(key, value);
        }
    }
    Ok(ordered)
}

/// `race(ps)`: settles with whichever promise settles first, fulfilled or
/// rejected. Empty input never settles — this is documented, not
/// special-cased, so the returned future simply never completes.
pub async fn race<K, T>(promises: IndexMap<K, Promise<T>>) -> DuetResult<T>
where
    K: Eq + Hash + Send + 'static,
    T: Clone + Send + 'static,
{
    if promises.is_empty() {
        std::future::pending::<()>().await;
        unreachable!("pending future never resolves");
    }
    let mut join_set = JoinSet::new();
    for (_, promise) in promises {
        join_set.spawn(async move { promise.await_value().await });
    }
    join_set
        .join_next()
        .await
        .expect("non-empty input spawns at least one task")
        .expect("combinator tasks never panic")
}

/// `all_settled(ps)`: never rejects; resolves with each promise's terminal
/// status in original key order.
pub async fn all_settled<K, T>(promises: IndexMap<K, Promise<T>>) -> IndexMap<K, Outcome<T>>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
{
    if promises.is_empty() {
        return IndexMap::new();
    }
    let order = key_order(&promises);

    let mut join_set = JoinSet::new();
    for (key, promise) in promises {
        join_set.spawn(async move { (key, promise.await_value().await) });
    }

    let mut values: IndexMap<K, Outcome<T>> = IndexMap::new();
    while let Some(joined) = join_set.join_next().await {
        let (key, outcome) = joined.expect("combinator tasks never panic");
        let status = match outcome {
            Ok(v) => Outcome::Fulfilled(v),
            Err(e) => Outcome::Rejected(e),
        };
        values.insert(key, status);
    }

    let mut ordered = IndexMap::with_capacity(order.len());
    for key in order {
        if let Some(value) = values.swap_remove(&key) {
            ordered.insert(key, value);
        }
    }
    ordered
}

/// `any(ps)`: resolves with the first fulfillment observed; rejects with a
/// synthetic aggregate reason if every promise rejects. Empty input
/// rejects immediately without spawning anything.
pub async fn any<K, T>(promises: IndexMap<K, Promise<T>>) -> DuetResult<T>
where
    K: Eq + Hash + Send + 'static,
    T: Clone + Send + 'static,
{
    if promises.is_empty() {
        return Err(DuetError::Aggregate(
            "No promises provided to any()".to_string(),
        ));
    }
    let mut join_set = JoinSet::new();
    for (_, promise) in promises {
        join_set.spawn(async move { promise.await_value().await });
    }
    while let Some(joined) = join_set.join_next().await {
        if let Ok(value) = joined.expect("combinator tasks never panic") {
            return Ok(value);
        }
    }
    Err(DuetError::Aggregate(
        "All promises were rejected".to_string(),
    ))
}

/// `delay(ms)`: fulfills with `()` after `duration`. Cancelled implicitly
/// if the returned promise is dropped before it fires, since nothing else
/// is holding the sleeping task alive.
pub fn delay(duration: Duration) -> Promise<()> {
    Promise::new(move |resolver| {
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            resolver.resolve(());
        });
    })
}

/// `resolve(v)`: immediately-fulfilled promise.
pub fn resolve<T: Clone + Send + 'static>(value: T) -> Promise<T> {
    Promise::new(move |resolver| resolver.resolve(value))
}

/// `reject(r)`: immediately-rejected promise.
pub fn reject<T: Clone + Send + 'static>(reason: DuetError) -> Promise<T> {
    Promise::new(move |resolver| resolver.reject(reason))
}

/// `map(callables)` ≡ `all([async(c) for c in callables])`: each callable
/// runs on the substrate's scheduling primitive (`spawn_blocking`, since a
/// callable may be CPU-bound or fallible in ways that shouldn't stall the
/// executor) and its promise joins the same `all` used above.
pub async fn map<K, T, F>(callables: IndexMap<K, F>) -> DuetResult<IndexMap<K, T>>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + 'static,
    F: FnOnce() -> DuetResult<T> + Send + 'static,
{
    let promises: IndexMap<K, Promise<T>> = callables
        .into_iter()
        .map(|(key, callable)| {
            let promise = Promise::new(move |resolver| {
                tokio::spawn(async move {
                    match tokio::task::spawn_blocking(callable).await {
                        Ok(Ok(value)) => resolver.resolve(value),
                        Ok(Err(e)) => resolver.reject(e),
                        Err(join_err) => {
                            resolver.reject(DuetError::Task(ErrorRecord::new(
                                "JoinError",
                                join_err.to_string(),
                            )));
                        }
                    }
                });
            });
            (key, promise)
        })
        .collect();
    all(promises).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed<T>(values: Vec<T>) -> IndexMap<usize, Promise<T>>
    where
        T: Clone + Send + 'static,
    {
        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i, resolve(v)))
            .collect()
    }

    #[tokio::test]
    async fn all_preserves_keys_on_success() {
        let results = all(keyed(vec![1, 2, 3])).await.unwrap();
        assert_eq!(results.values().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn all_empty_resolves_empty() {
        let results: IndexMap<usize, i32> = all(IndexMap::new()).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn all_rejects_on_first_failure() {
        let mut promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        promises.insert(0, resolve(1));
        promises.insert(1, reject(DuetError::Timeout));
        let err = all(promises).await.unwrap_err();
        assert!(matches!(err, DuetError::Timeout));
    }

    #[tokio::test]
    async fn all_settled_never_rejects() {
        let mut promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        promises.insert(0, resolve(1));
        promises.insert(1, reject(DuetError::Timeout));
        let results = all_settled(promises).await;
        assert!(matches!(results.get(&0).unwrap(), Outcome::Fulfilled(1)));
        assert!(matches!(results.get(&1).unwrap(), Outcome::Rejected(_)));
    }

    #[tokio::test]
    async fn any_resolves_with_first_fulfillment() {
        let mut promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        promises.insert(0, reject(DuetError::Timeout));
        promises.insert(1, resolve(99));
        let value = any(promises).await.unwrap();
        assert_eq!(value, 99);
    }

    #[tokio::test]
    async fn any_aggregates_when_all_reject() {
        let mut promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        promises.insert(0, reject(DuetError::Timeout));
        promises.insert(1, reject(DuetError::Deadlock));
        let err = any(promises).await.unwrap_err();
        assert!(matches!(err, DuetError::Aggregate(_)));
    }

    #[tokio::test]
    async fn any_empty_rejects_with_named_message() {
        let promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        let err = any(promises).await.unwrap_err();
        match err {
            DuetError::Aggregate(msg) => assert_eq!(msg, "No promises provided to any()"),
            other => panic!("expected Aggregate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn race_settles_with_first_to_finish() {
        let mut promises: IndexMap<usize, Promise<i32>> = IndexMap::new();
        promises.insert(0, delay(Duration::from_millis(50)).then(|_| Ok(1)));
        promises.insert(1, resolve(2));
        let value = race(promises).await.unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn map_runs_each_callable() {
        let mut callables: IndexMap<usize, Box<dyn FnOnce() -> DuetResult<i32> + Send>> = IndexMap::new();
        callables.insert(0, Box::new(|| Ok(10)));
        callables.insert(1, Box::new(|| Ok(20)));
        let results = map(callables).await.unwrap();
        assert_eq!(results.values().copied().collect::<Vec<_>>(), vec![10, 20]);
    }
}
