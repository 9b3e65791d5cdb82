//! External timer collaborator: `after`/`tick`/`clear`/`clear_all`/`exists`/
//! `get_timers` as a trait, with `TokioTimer` the one concrete adapter a
//! runnable workspace needs behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

pub trait Timer: Send + Sync {
    /// One-shot: runs `callback` once after `delay`.
    fn after(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> u64;
    /// Periodic: runs `callback` every `interval` until cleared.
    fn tick(&self, interval: Duration, callback: Box<dyn Fn() + Send>) -> u64;
    fn clear(&self, id: u64) -> bool;
    fn clear_all(&self);
    fn exists(&self, id: u64) -> bool;
    fn get_timers(&self) -> Vec<u64>;
}

/// `Timer` backed by `tokio::time`; ids are assigned from an atomic
/// counter and map to the spawned task's `JoinHandle`, which `abort()`
/// makes cancellation immediate and race-free.
#[derive(Default)]
pub struct TokioTimer {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl Timer for TokioTimer {
    fn after(&self, delay: Duration, callback: Box<dyn FnOnce() + Send>) -> u64 {
        let id = self.next_id();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        self.handles
            .lock()
            .expect("timer registry lock poisoned")
            .insert(id, handle);
        id
    }

    fn tick(&self, interval: Duration, callback: Box<dyn Fn() + Send>) -> u64 {
        let id = self.next_id();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; this one is free
            loop {
                ticker.tick().await;
                callback();
            }
        });
        self.handles
            .lock()
            .expect("timer registry lock poisoned")
            .insert(id, handle);
        id
    }

    fn clear(&self, id: u64) -> bool {
        match self
            .handles
            .lock()
            .expect("timer registry lock poisoned")
            .remove(&id)
        {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn clear_all(&self) {
        let mut handles = self.handles.lock().expect("timer registry lock poisoned");
        for (_, handle) in handles.drain() {
            handle.abort();
        }
    }

    fn exists(&self, id: u64) -> bool {
        let mut handles = self.handles.lock().expect("timer registry lock poisoned");
        match handles.get(&id) {
            Some(handle) if handle.is_finished() => {
                handles.remove(&id);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn get_timers(&self) -> Vec<u64> {
        let mut handles = self.handles.lock().expect("timer registry lock poisoned");
        handles.retain(|_, handle| !handle.is_finished());
        handles.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[tokio::test]
    async fn after_runs_once_and_is_removable_before_firing() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let id = timer.after(Duration::from_secs(10), Box::new(move || fired_clone.store(true, Ordering::SeqCst)));
        assert!(timer.exists(id));
        assert!(timer.clear(id));
        assert!(!timer.exists(id));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn after_fires_and_then_is_not_tracked() {
        let timer = TokioTimer::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let id = timer.after(Duration::from_millis(5), Box::new(move || fired_clone.store(true, Ordering::SeqCst)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!timer.exists(id));
    }

    #[tokio::test]
    async fn clear_all_stops_every_timer() {
        let timer = TokioTimer::new();
        let count = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let count = count.clone();
            timer.after(Duration::from_secs(10), Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(timer.get_timers().len(), 3);
        timer.clear_all();
        assert_eq!(timer.get_timers().len(), 0);
    }
}
