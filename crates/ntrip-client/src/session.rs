//! The session engine: a single worker loop that owns the socket, the
//! parser, and the health state, and drives the
//! Disconnected → Connecting → Streaming (→ LockedOut) machine.
//!
//! The worker is the only mutator of the connection; observers read the
//! shared atomics and the stats registry. Control actions (`stop`, `reset`,
//! `reconnect`) write the same atomics and are picked up at the top of the
//! next pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use ntrip_proto::{
    HealthTracker, NtripError, NtripFault, RetryDecision, StreamPhase, retry_gate,
    scan_for_preamble,
};
use rtcm_core::{FrameEvent, RtcmParser, message_description};

use crate::config::NtripConfig;
use crate::shutdown::StopToken;
use crate::sink::CorrectionSink;
use crate::stats::{LocalDelta, ProtocolVersion, StatsRegistry};
use crate::transport::connect_caster;

/// Interval between folds of the local accumulators into the registry.
const STATS_FLUSH_MS: u64 = 250;

/// Yield at the bottom of every pass; also bounds one socket read.
const IDLE_TICK: Duration = Duration::from_millis(10);

/// Poll interval while waiting out the retry window.
const RETRY_POLL: Duration = Duration::from_millis(200);

/// Poll interval while locked out.
const LOCKOUT_POLL: Duration = Duration::from_millis(500);

/// Connection state of the session, readable from any task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    LockedOut = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Streaming,
            3 => SessionState::LockedOut,
            _ => SessionState::Disconnected,
        }
    }
}

/// State shared between the worker and observers.
///
/// Scalars are atomics (single-writer in steady operation, but control
/// actions may also store to them); the stats record sits behind the
/// registry's mutex.
pub(crate) struct Shared {
    state: AtomicU8,
    healthy: AtomicBool,
    pub(crate) failures: AtomicU32,
    pub(crate) last_attempt_ms: AtomicU64,
    pub(crate) stats: StatsRegistry,
    pub(crate) stop: StopToken,
    epoch: Instant,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(SessionState::Disconnected as u8),
            healthy: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            last_attempt_ms: AtomicU64::new(0),
            stats: StatsRegistry::new(),
            stop: StopToken::new(),
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since the client was created.
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub(crate) fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Commit a failure pair to the registry before any state transition, so
    /// observers that see the transition can read the explanation.
    pub(crate) fn commit_fault(&self, fault: &NtripFault) {
        self.stats.set_fault(fault);
        error!(kind = ?fault.kind, "{}", fault.message);
    }
}

/// Shared handle to the downstream sink.
///
/// The worker takes the lock once per socket read. The lock exists so the
/// client can hand the sink to a fresh worker after a restart; nothing else
/// contends for it.
pub(crate) type SharedSink = Arc<std::sync::Mutex<Box<dyn CorrectionSink>>>;

enum ReadOutcome {
    Data(usize),
    Idle,
    Closed(String),
}

/// The worker. Owns the socket, the parser, the read buffer, and the local
/// stats accumulators for the lifetime of one `run()`.
pub(crate) struct SessionEngine {
    shared: Arc<Shared>,
    config: NtripConfig,
    sink: SharedSink,
    parser: RtcmParser,
    health: HealthTracker,
    socket: Option<TcpStream>,
    buffer: Vec<u8>,
    delta: LocalDelta,
    last_flush_ms: u64,
    stop_rx: watch::Receiver<bool>,
}

impl SessionEngine {
    pub(crate) fn new(shared: Arc<Shared>, config: NtripConfig, sink: SharedSink) -> Self {
        let health = HealthTracker::new(
            config.required_valid_frames,
            config.health_timeout_ms,
            config.passive_sample_ms,
        );
        let buffer = vec![0u8; config.buffer_size];
        let stop_rx = shared.stop.subscribe();
        Self {
            shared,
            config,
            sink,
            parser: RtcmParser::new(),
            health,
            socket: None,
            buffer,
            delta: LocalDelta::default(),
            last_flush_ms: 0,
            stop_rx,
        }
    }

    /// Run until the stop signal. Tail: flush accumulators, drop the socket.
    pub(crate) async fn run(mut self) {
        debug!("session worker started");
        while !self.shared.stop.is_stopped() {
            self.pass().await;
            self.wait(IDLE_TICK).await;
        }

        let now = self.shared.now_ms();
        self.shared.stats.apply_delta(&mut self.delta, now);
        self.close_socket();
        self.shared.stop.release();
        debug!("session worker stopped");
    }

    /// One pass of the work loop.
    async fn pass(&mut self) {
        // Socket hygiene: no socket outlives a non-active state (covers
        // control actions that moved the state underneath us).
        let state = self.shared.state();
        if state != SessionState::Streaming && state != SessionState::Connecting {
            self.close_socket();
        }

        match state {
            SessionState::Disconnected => self.on_disconnected().await,
            SessionState::Connecting => self.on_connecting().await,
            SessionState::Streaming => self.on_streaming().await,
            SessionState::LockedOut => self.wait(LOCKOUT_POLL).await,
        }

        let now = self.shared.now_ms();
        if now.saturating_sub(self.last_flush_ms) >= STATS_FLUSH_MS {
            self.shared.stats.apply_delta(&mut self.delta, now);
            self.last_flush_ms = now;
        }
    }

    async fn on_disconnected(&mut self) {
        let now = self.shared.now_ms();
        let failures = self.shared.failures.load(Ordering::SeqCst);
        let decision = retry_gate(
            failures,
            self.config.max_tries,
            now,
            self.shared.last_attempt_ms.load(Ordering::SeqCst),
            self.config.retry_delay_ms,
        );
        match decision {
            RetryDecision::Wait => self.wait(RETRY_POLL).await,
            RetryDecision::LockOut => {
                self.shared.commit_fault(&NtripFault::new(
                    NtripError::MaxRetriesExceeded,
                    format!("failed {failures} consecutive connection attempts"),
                ));
                self.shared.set_state(SessionState::LockedOut);
            }
            RetryDecision::Attempt => self.shared.set_state(SessionState::Connecting),
        }
    }

    async fn on_connecting(&mut self) {
        // Stamp the attempt; 0 is reserved as the forced-reconnect sentinel.
        let now = self.shared.now_ms().max(1);
        self.shared.last_attempt_ms.store(now, Ordering::SeqCst);

        let attempt = self.shared.failures.load(Ordering::SeqCst) + 1;
        info!(
            host = %self.config.host,
            port = self.config.port,
            mount = %self.config.mount,
            attempt,
            max_tries = self.config.max_tries,
            "connecting to caster"
        );

        match connect_caster(&self.config).await {
            Ok(conn) => {
                let now = self.shared.now_ms();
                self.shared.failures.store(0, Ordering::SeqCst);
                self.parser.reset();
                self.health.on_connect(now);
                self.shared.set_healthy(false);
                self.delta.clear();
                self.last_flush_ms = now;
                self.shared
                    .stats
                    .on_connected(now, ProtocolVersion::from(conn.revision));
                self.socket = Some(conn.stream);
                self.shared.set_state(SessionState::Streaming);
                info!(revision = ?conn.revision, "connected, validating stream");
            }
            Err(fault) => {
                self.shared.commit_fault(&fault);
                self.shared.failures.fetch_add(1, Ordering::SeqCst);
                self.shared.set_state(SessionState::Disconnected);
            }
        }
    }

    async fn on_streaming(&mut self) {
        let outcome = match self.socket.as_mut() {
            None => ReadOutcome::Closed(format!("socket closed by {}", self.config.host)),
            Some(socket) => {
                match tokio::time::timeout(IDLE_TICK, socket.read(&mut self.buffer)).await {
                    Ok(Ok(0)) => {
                        ReadOutcome::Closed(format!("socket closed by {}", self.config.host))
                    }
                    Ok(Ok(n)) => ReadOutcome::Data(n),
                    Ok(Err(e)) => ReadOutcome::Closed(format!(
                        "read from {} failed: {e}",
                        self.config.host
                    )),
                    Err(_) => ReadOutcome::Idle,
                }
            }
        };

        match outcome {
            ReadOutcome::Data(n) => self.process_bytes(n),
            ReadOutcome::Idle => {}
            ReadOutcome::Closed(message) => {
                warn!("connection lost");
                self.fail_stream(NtripFault::new(NtripError::TcpConnectFailed, message));
                return;
            }
        }

        // Liveness checks run whether or not bytes arrived.
        let now = self.shared.now_ms();
        if self.health.is_zombie(now) {
            let silent_ms = now.saturating_sub(self.health.last_health_ms());
            warn!(silent_ms, "zombie stream detected");
            self.fail_stream(NtripFault::new(
                NtripError::ZombieStream,
                format!("no valid RTCM for {silent_ms} ms"),
            ));
            return;
        }
        if self.health.validation_expired(now) {
            self.fail_stream(NtripFault::new(
                NtripError::StreamValidationFailed,
                format!(
                    "only {}/{} valid frames within {} ms",
                    self.health.valid_frames(),
                    self.config.required_valid_frames,
                    self.health.validation_latency_ms(now),
                ),
            ));
        }
    }

    /// Handle one socket read: forward verbatim, then account and validate.
    fn process_bytes(&mut self, n: usize) {
        // Fast path first: a correction byte arrives and leaves before any
        // parsing happens.
        {
            let data = &self.buffer[..n];
            let mut sink = self
                .sink
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match sink.write(data) {
                Ok(written) if written < n => {
                    debug!(written, expected = n, "short write to sink")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "sink write failed"),
            }
        }
        self.delta.bytes += n as u64;

        match self.health.phase() {
            StreamPhase::Validation => self.validate_bytes(n),
            StreamPhase::Steady => {
                let now = self.shared.now_ms();
                if self.health.sample_due(now) {
                    let found = scan_for_preamble(&self.buffer[..n]);
                    self.health.record_sample(found, now);
                    if found {
                        self.delta.last_frame_time_ms = now;
                    } else {
                        warn!("no preamble in passive sample");
                    }
                }
            }
        }
    }

    /// Strict validation: parse every byte until the stream has proven
    /// itself. Bytes after the promoting frame were already forwarded and
    /// are left unparsed.
    fn validate_bytes(&mut self, n: usize) {
        for i in 0..n {
            match self.parser.feed(self.buffer[i]) {
                Some(FrameEvent::Valid {
                    message_type,
                    length,
                }) => {
                    let now = self.shared.now_ms();
                    self.delta.frames += 1;
                    self.delta.last_message_type = message_type;
                    self.delta.last_frame_time_ms = now;
                    let promoted = self.health.on_valid_frame(now);
                    debug!(
                        message_type,
                        length,
                        kind = message_description(message_type).unwrap_or("other"),
                        frames = self.health.valid_frames(),
                        required = self.config.required_valid_frames,
                        "valid frame"
                    );
                    if promoted {
                        self.shared.set_healthy(true);
                        info!(
                            latency_ms = self.health.validation_latency_ms(now),
                            "stream validated"
                        );
                        break;
                    }
                }
                Some(FrameEvent::CrcError { .. }) => {
                    self.delta.crc_errors += 1;
                }
                None => {}
            }
        }
    }

    /// Commit the fault, then tear the connection down to `Disconnected`.
    fn fail_stream(&mut self, fault: NtripFault) {
        self.shared.commit_fault(&fault);
        self.close_socket();
        self.shared.set_state(SessionState::Disconnected);
        self.shared.stats.set_protocol_version(ProtocolVersion::None);
    }

    fn close_socket(&mut self) {
        if self.socket.take().is_some() {
            debug!("socket closed");
        }
        self.shared.set_healthy(false);
    }

    /// Sleep, cut short by the stop signal.
    async fn wait(&mut self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.stop_rx.changed() => {}
        }
    }
}
