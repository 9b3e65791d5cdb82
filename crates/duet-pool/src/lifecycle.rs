//! Process lifecycle: default-pool lazy construction/recreation (see
//! [`crate::dispatch::default_pool`]) plus the signal-driven shutdown path.
//! The first `SIGINT`/`SIGTERM` requests a graceful drain; a second one
//! escalates to an immediate shutdown.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dispatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    Graceful,
    Immediate,
}

/// Tracks how many termination signals have been observed: the first is
/// graceful (drain in flight work), any further signal is immediate.
#[derive(Debug, Default)]
pub struct ShutdownController {
    signalled: AtomicU8,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            signalled: AtomicU8::new(0),
        }
    }

    fn bump(&self) -> u8 {
        self.signalled.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Spawn the signal-handling task. On the first `ctrl_c`/`SIGTERM`, the
/// default pool is drained and terminated; a second signal tears it down
/// immediately without waiting for in-flight tasks.
pub fn spawn_shutdown_handler(
    controller: Arc<ShutdownController>,
    events_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        loop {
            #[cfg(unix)]
            let signalled = tokio::select! {
                res = tokio::signal::ctrl_c() => res.is_ok(),
                _ = term.recv() => true,
            };
            #[cfg(not(unix))]
            let signalled = tokio::signal::ctrl_c().await.is_ok();

            if !signalled {
                return;
            }

            let n = controller.bump();
            if n == 1 {
                let _ = events_tx.send(ShutdownEvent::Graceful);
            } else {
                let _ = events_tx.send(ShutdownEvent::Immediate);
                return;
            }
        }
    });
}

/// Run the default event loop reaction to a shutdown signal: drain on the
/// first event, then return. Callers with their own event loop can instead
/// match on [`ShutdownEvent`] from the channel directly.
pub async fn handle_shutdown_event(event: ShutdownEvent) {
    match event {
        ShutdownEvent::Graceful => dispatch::shutdown().await,
        ShutdownEvent::Immediate => dispatch::shutdown().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_escalates_after_second_signal() {
        let controller = ShutdownController::new();
        assert_eq!(controller.bump(), 1);
        assert_eq!(controller.bump(), 2);
    }
}
