//! Pool workers: real OS threads that pull from one shared queue with a
//! short `recv_timeout`, so idle workers never block a busy one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tokio::sync::oneshot;

use crate::task::{BoxedTask, TaskOutcome};

/// One unit of queued work: the task itself and where to deliver its
/// outcome. The reply channel is a tokio oneshot even though the sending
/// side runs on a plain OS thread — `Sender::send` on an unbounded oneshot
/// never blocks, so this costs nothing on the worker side.
pub(crate) struct QueueItem {
    pub task: BoxedTask,
    pub reply: oneshot::Sender<TaskOutcome>,
}

/// Spawn one worker thread. `barrier` is shared by every worker started in
/// the same [`crate::pool::create_pool`] call, so the pool is never handed
/// out with workers still booting.
pub(crate) fn spawn_worker(
    id: usize,
    queue: Receiver<QueueItem>,
    shutdown: Arc<AtomicBool>,
    barrier: Arc<Barrier>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("duet-worker-{id}"))
        .spawn(move || {
            barrier.wait();
            loop {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                let poll_sleep = duet_core::config::get_worker_sleep();
                match queue.recv_timeout(poll_sleep) {
                    Ok(item) => {
                        let outcome = run_one(item.task);
                        // Caller may have already stopped awaiting (e.g. the
                        // batch timed out); a dropped receiver is not an error.
                        let _ = item.reply.send(outcome);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        })
        .expect("failed to spawn duet worker thread")
}

fn run_one(task: BoxedTask) -> TaskOutcome {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
        Ok(outcome) => outcome,
        Err(payload) => Err(duet_core::ErrorRecord::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn worker_runs_task_and_replies() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(Barrier::new(2));
        let handle = spawn_worker(0, rx, shutdown.clone(), barrier.clone());
        barrier.wait();

        let (reply_tx, reply_rx) = oneshot::channel();
        let task: BoxedTask = Box::new(|| Ok(Box::new(41i32 + 1) as Box<dyn std::any::Any + Send>));
        tx.send(QueueItem {
            task,
            reply: reply_tx,
        })
        .unwrap();

        let outcome = reply_rx.blocking_recv().unwrap();
        let value = *outcome.unwrap().downcast::<i32>().unwrap();
        assert_eq!(value, 42);

        shutdown.store(true, Ordering::Release);
        drop(tx);
        std::thread::sleep(Duration::from_millis(20));
        handle.join().unwrap();
    }

    #[test]
    fn panicking_task_becomes_error_record() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let barrier = Arc::new(Barrier::new(2));
        let handle = spawn_worker(0, rx, shutdown.clone(), barrier.clone());
        barrier.wait();

        let (reply_tx, reply_rx) = oneshot::channel();
        let task: BoxedTask = Box::new(|| panic!("boom"));
        tx.send(QueueItem {
            task,
            reply: reply_tx,
        })
        .unwrap();

        let outcome = reply_rx.blocking_recv().unwrap();
        let record = outcome.unwrap_err();
        assert_eq!(record.class, "Panic");
        assert!(record.message.contains("boom"));

        shutdown.store(true, Ordering::Release);
        drop(tx);
        std::thread::sleep(Duration::from_millis(20));
        handle.join().unwrap();
    }
}
