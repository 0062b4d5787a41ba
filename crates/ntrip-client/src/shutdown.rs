//! Stop signalling and bounded join for the session worker.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Coordinates the lifecycle of the single session worker.
///
/// Bundles the stop signal (a `watch` channel the worker selects on at its
/// suspension points), a running flag claimed with compare-and-swap so two
/// callers cannot spawn two workers, and storage for the worker's
/// `JoinHandle` so shutdown can wait for a clean exit and force-terminate an
/// unresponsive worker.
pub struct StopToken {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl StopToken {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            stop_tx,
            stop_rx,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// A fresh subscription to the stop signal for the worker to select on.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_rx.clone()
    }

    /// Whether the stop signal has been sent.
    pub fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Claim the worker slot. Returns false if a worker already runs.
    pub fn try_acquire(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the worker slot (called by the worker on exit).
    pub fn release(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether a worker currently holds the slot.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear a previous stop signal so a new worker can run.
    pub fn rearm(&self) {
        let _ = self.stop_tx.send(false);
    }

    /// Send the stop signal. Idempotent.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Register the spawned worker's handle.
    pub fn set_task(&self, handle: JoinHandle<()>) {
        *self.lock_handle() = Some(handle);
    }

    /// Whether a worker handle is registered.
    pub fn has_task(&self) -> bool {
        self.lock_handle().is_some()
    }

    /// Wait up to `wait` for the worker to exit, polling every `poll`;
    /// abort it if the deadline passes. Returns true on a clean exit.
    pub async fn join_timeout(&self, wait: Duration, poll: Duration) -> bool {
        let Some(handle) = self.lock_handle().take() else {
            return true;
        };

        let deadline = tokio::time::Instant::now() + wait;
        while !handle.is_finished() {
            if tokio::time::Instant::now() >= deadline {
                handle.abort();
                let _ = handle.await;
                self.release();
                return false;
            }
            tokio::time::sleep(poll).await;
        }
        let _ = handle.await;
        self.release();
        true
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // A poisoned lock only means a panicking thread held it; the
        // Option inside is still coherent.
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_token_is_idle() {
        let token = StopToken::new();
        assert!(!token.is_stopped());
        assert!(!token.is_running());
        assert!(!token.has_task());
    }

    #[test]
    fn acquire_is_exclusive_until_release() {
        let token = StopToken::new();
        assert!(token.try_acquire());
        assert!(!token.try_acquire());
        assert!(token.is_running());
        token.release();
        assert!(token.try_acquire());
    }

    #[test]
    fn stop_signal_visible_to_subscribers() {
        let token = StopToken::new();
        let rx = token.subscribe();
        token.signal_stop();
        assert!(*rx.borrow());
        assert!(token.is_stopped());
    }

    #[test]
    fn rearm_clears_stop() {
        let token = StopToken::new();
        token.signal_stop();
        token.rearm();
        assert!(!token.is_stopped());
    }

    #[tokio::test]
    async fn join_without_task_is_clean() {
        let token = StopToken::new();
        assert!(
            token
                .join_timeout(Duration::from_millis(100), Duration::from_millis(10))
                .await
        );
    }

    #[tokio::test]
    async fn join_waits_for_cooperative_worker() {
        let token = StopToken::new();
        let mut rx = token.subscribe();
        token.set_task(tokio::spawn(async move {
            let _ = rx.changed().await;
        }));
        token.signal_stop();
        let clean = token
            .join_timeout(Duration::from_secs(1), Duration::from_millis(10))
            .await;
        assert!(clean);
        assert!(!token.has_task());
    }

    #[tokio::test]
    async fn join_aborts_unresponsive_worker() {
        let token = StopToken::new();
        assert!(token.try_acquire());
        token.set_task(tokio::spawn(async {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }));
        token.signal_stop();
        let clean = token
            .join_timeout(Duration::from_millis(200), Duration::from_millis(50))
            .await;
        assert!(!clean);
        // Forced termination releases the slot for a future worker.
        assert!(!token.is_running());
    }
}
