//! The public client: lifecycle, control actions, and observer queries.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use ntrip_proto::{NtripError, NtripFault};

use crate::config::NtripConfig;
use crate::session::{SessionEngine, SessionState, Shared, SharedSink};
use crate::sink::CorrectionSink;
use crate::stats::{NtripStats, ProtocolVersion};

/// How long `shutdown` waits for the worker before force-terminating it.
const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// A long-running NTRIP correction client.
///
/// Constructing the client validates the configuration and wires the sink;
/// [`start`](Self::start) spawns the background worker that maintains the
/// caster session. All queries and control actions are callable from any
/// task while the worker runs.
///
/// ```no_run
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// use ntrip_client::{NtripClient, NtripConfig};
///
/// let config = NtripConfig {
///     host: "caster.example.com".into(),
///     mount: "MOUNT1".into(),
///     user: "user@example.com".into(),
///     password: "secret".into(),
///     ..NtripConfig::default()
/// };
/// let serial = std::fs::OpenOptions::new().write(true).open("/dev/ttyUSB0")?;
/// let client = NtripClient::new(config, serial)?;
/// client.start();
/// # Ok(())
/// # }
/// ```
pub struct NtripClient {
    shared: Arc<Shared>,
    config: NtripConfig,
    sink: SharedSink,
}

impl std::fmt::Debug for NtripClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NtripClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NtripClient {
    /// Validate the configuration and set up a session.
    ///
    /// Returns an [`NtripError::InvalidConfig`] fault if a required field is
    /// empty or a positive-integer field is zero. No worker is spawned and
    /// no connection is attempted yet.
    pub fn new(
        config: NtripConfig,
        sink: impl CorrectionSink + 'static,
    ) -> Result<Self, NtripFault> {
        config.validate()?;
        info!(
            host = %config.host,
            port = config.port,
            mount = %config.mount,
            "ntrip client initialised"
        );
        Ok(Self {
            shared: Arc::new(Shared::new()),
            config,
            sink: Arc::new(std::sync::Mutex::new(Box::new(sink))),
        })
    }

    /// Spawn the background session worker.
    ///
    /// Returns false (and does nothing) if a worker is already running.
    /// Requires a tokio runtime.
    #[cfg(feature = "task")]
    pub fn start(&self) -> bool {
        if !self.shared.stop.try_acquire() {
            warn!("session worker already running, ignoring start");
            return false;
        }
        self.shared.stop.rearm();
        let engine = SessionEngine::new(
            Arc::clone(&self.shared),
            self.config.clone(),
            Arc::clone(&self.sink),
        );
        let handle = tokio::spawn(engine.run());
        self.shared.stop.set_task(handle);
        info!("session worker started");
        true
    }

    /// Signal the worker to stop and wait for a clean exit.
    ///
    /// Waits up to 5 s, then force-terminates. Returns false if no worker
    /// was running.
    #[cfg(feature = "task")]
    pub async fn shutdown(&self) -> bool {
        if !self.shared.stop.has_task() {
            return false;
        }
        self.shared.stop.signal_stop();
        let clean = self.shared.stop.join_timeout(SHUTDOWN_WAIT, SHUTDOWN_POLL).await;
        info!(clean, "session worker stopped");
        true
    }

    /// Whether the background worker is currently active.
    #[cfg(feature = "task")]
    pub fn is_task_running(&self) -> bool {
        self.shared.stop.is_running()
    }

    /// Drive the session loop on the caller's task.
    ///
    /// The no-background-worker mode: runs until [`shutdown`](Self::shutdown)
    /// is invoked from another task (with the `task` feature) or the future
    /// is dropped. Returns immediately if a worker already runs.
    pub async fn run(&self) {
        if !self.shared.stop.try_acquire() {
            warn!("session worker already running, ignoring run");
            return;
        }
        self.shared.stop.rearm();
        let engine = SessionEngine::new(
            Arc::clone(&self.shared),
            self.config.clone(),
            Arc::clone(&self.sink),
        );
        engine.run().await;
    }

    // -- Control actions (thread-safe, non-blocking) --

    /// Close the session and engage the lockout.
    ///
    /// No connection is attempted until [`reset`](Self::reset) or
    /// [`reconnect`](Self::reconnect). The worker keeps running.
    pub fn stop(&self) {
        self.shared
            .failures
            .store(self.config.max_tries, std::sync::atomic::Ordering::SeqCst);
        self.shared.set_healthy(false);
        self.shared.set_state(SessionState::LockedOut);
        self.shared.stats.set_protocol_version(ProtocolVersion::None);
        info!("session stopped, lockout engaged");
    }

    /// Clear the failure budget and any recorded error, returning the
    /// session to `Disconnected` (from where it reconnects normally).
    pub fn reset(&self) {
        self.shared
            .failures
            .store(0, std::sync::atomic::Ordering::SeqCst);
        self.shared.set_state(SessionState::Disconnected);
        self.shared.stats.clear_fault();
        info!("session reset, lockout cleared");
    }

    /// Drop the current connection (if any) and attempt a new one
    /// immediately, bypassing the retry delay.
    pub fn reconnect(&self) {
        self.shared.set_healthy(false);
        self.shared.set_state(SessionState::Disconnected);
        self.shared.stats.set_protocol_version(ProtocolVersion::None);
        self.shared
            .last_attempt_ms
            .store(0, std::sync::atomic::Ordering::SeqCst);
        info!("reconnect requested");
    }

    // -- Observer queries (thread-safe, non-blocking) --

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state() == SessionState::Streaming
    }

    /// True once the stream has passed validation; false during the
    /// validation phase and whenever the session is not streaming.
    pub fn is_healthy(&self) -> bool {
        self.shared.is_healthy()
    }

    /// A coherent snapshot of the session statistics.
    pub fn stats(&self) -> NtripStats {
        self.shared.stats.snapshot()
    }

    pub fn last_error(&self) -> Option<NtripError> {
        self.shared.stats.last_error()
    }

    pub fn error_message(&self) -> String {
        self.shared.stats.error_message()
    }
}
