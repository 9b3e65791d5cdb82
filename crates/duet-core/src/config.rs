//! Process-wide configuration.
//!
//! Lifecycle is init-at-first-read, mutable via setters, reset by
//! [`reset_config`], backed by a single global `RwLock` singleton with a
//! `DEFAULT_*` const per field.

use std::sync::{OnceLock, RwLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub max_task_timeout: Duration,
    pub deadlock_detection_interval: Duration,
    pub worker_sleep: Duration,
    pub gc_check_interval: u64,
    pub memory_threshold_for_gc: u64,
    pub initial_poll_sleep: Duration,
    pub max_poll_sleep: Duration,
    pub thenable_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_task_timeout: Duration::from_secs(30),
            deadlock_detection_interval: Duration::from_secs(5),
            worker_sleep: Duration::from_micros(10_000),
            gc_check_interval: 10,
            memory_threshold_for_gc: 50 * 1024 * 1024,
            initial_poll_sleep: Duration::from_micros(100),
            max_poll_sleep: Duration::from_micros(10_000),
            thenable_timeout: Duration::from_secs(30),
        }
    }
}

fn global() -> &'static RwLock<Config> {
    static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();
    CONFIG.get_or_init(|| RwLock::new(Config::default()))
}

/// Snapshot the whole table at once (used by `execute`/`Promise` internals
/// so a single batch/await sees a consistent set of values).
pub fn snapshot() -> Config {
    *global().read().expect("config lock poisoned")
}

/// Restore every field to its default.
pub fn reset_config() {
    *global().write().expect("config lock poisoned") = Config::default();
}

macro_rules! accessor {
    ($get:ident, $set:ident, $field:ident, $ty:ty) => {
        pub fn $get() -> $ty {
            global().read().expect("config lock poisoned").$field
        }

        pub fn $set(value: $ty) {
            global().write().expect("config lock poisoned").$field = value;
        }
    };
}

accessor!(
    get_max_task_timeout,
    set_max_task_timeout,
    max_task_timeout,
    Duration
);
accessor!(
    get_deadlock_detection_interval,
    set_deadlock_detection_interval,
    deadlock_detection_interval,
    Duration
);
accessor!(get_worker_sleep, set_worker_sleep, worker_sleep, Duration);
accessor!(
    get_gc_check_interval,
    set_gc_check_interval,
    gc_check_interval,
    u64
);
accessor!(
    get_memory_threshold_for_gc,
    set_memory_threshold_for_gc,
    memory_threshold_for_gc,
    u64
);
accessor!(
    get_initial_poll_sleep,
    set_initial_poll_sleep,
    initial_poll_sleep,
    Duration
);
accessor!(
    get_max_poll_sleep,
    set_max_poll_sleep,
    max_poll_sleep,
    Duration
);
accessor!(
    get_thenable_timeout,
    set_thenable_timeout,
    thenable_timeout,
    Duration
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Config is process-global; serialize tests that mutate it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_stable() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset_config();
        let cfg = snapshot();
        assert_eq!(cfg.max_task_timeout, Duration::from_secs(30));
        assert_eq!(cfg.gc_check_interval, 10);
        assert_eq!(cfg.memory_threshold_for_gc, 50 * 1024 * 1024);
    }

    #[test]
    fn setters_are_visible_and_reset_restores_defaults() {
        let _guard = TEST_LOCK.lock().unwrap();
        reset_config();
        set_max_task_timeout(Duration::from_secs(5));
        assert_eq!(get_max_task_timeout(), Duration::from_secs(5));
        reset_config();
        assert_eq!(get_max_task_timeout(), Duration::from_secs(30));
    }
}
