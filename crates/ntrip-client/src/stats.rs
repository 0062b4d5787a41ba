//! Session statistics: one lock, snapshot reads, batched hot-path updates.

use std::sync::Mutex;

use ntrip_proto::{NtripError, NtripFault, NtripRevision};

/// Protocol revision of the currently accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Not connected.
    #[default]
    None,
    Rev1,
    Rev2,
}

impl ProtocolVersion {
    /// Numeric form (0, 1, 2) for display and export.
    pub fn as_number(self) -> u8 {
        match self {
            ProtocolVersion::None => 0,
            ProtocolVersion::Rev1 => 1,
            ProtocolVersion::Rev2 => 2,
        }
    }
}

impl From<NtripRevision> for ProtocolVersion {
    fn from(rev: NtripRevision) -> Self {
        match rev {
            NtripRevision::Rev1 => ProtocolVersion::Rev1,
            NtripRevision::Rev2 => ProtocolVersion::Rev2,
        }
    }
}

/// A coherent snapshot of session statistics.
///
/// Counters are monotonic within a session; `last_error` always reflects the
/// most recently committed failure and survives state changes until a reset
/// or a fresh connection clears it.
#[derive(Debug, Clone, Default)]
pub struct NtripStats {
    pub total_frames: u32,
    pub crc_errors: u32,
    pub bytes_received: u64,
    pub reconnects: u32,
    /// Live uptime of the current connection, derived at flush time.
    pub total_uptime_ms: u64,
    pub last_message_type: u16,
    pub last_frame_time_ms: u64,
    pub connection_start_ms: u64,
    pub last_error: Option<NtripError>,
    pub last_error_message: String,
    pub protocol_version: ProtocolVersion,
}

/// Hot-path accumulators kept local to the session worker.
///
/// The worker folds these into the registry under the lock at a fixed
/// cadence (and at teardown) instead of taking the lock per read.
#[derive(Debug, Default)]
pub struct LocalDelta {
    pub bytes: u64,
    pub frames: u32,
    pub crc_errors: u32,
    pub last_message_type: u16,
    pub last_frame_time_ms: u64,
}

impl LocalDelta {
    pub fn clear(&mut self) {
        *self = LocalDelta::default();
    }
}

/// The shared statistics record.
///
/// One mutex guards the whole record; writers commit either a folded
/// [`LocalDelta`] or a single event field, and readers always receive a
/// coherent copy.
pub struct StatsRegistry {
    inner: Mutex<NtripStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(NtripStats::default()),
        }
    }

    /// Coherent copy of the current record.
    pub fn snapshot(&self) -> NtripStats {
        self.lock().clone()
    }

    /// Zero the record (session start).
    pub fn reset(&self) {
        *self.lock() = NtripStats::default();
    }

    /// Fold the worker's local accumulators into the record and drain them.
    ///
    /// Uptime is derived here from the connection start stamp so observers
    /// see it advance without per-byte bookkeeping.
    pub fn apply_delta(&self, delta: &mut LocalDelta, now_ms: u64) {
        let mut stats = self.lock();
        stats.bytes_received += delta.bytes;
        stats.total_frames += delta.frames;
        stats.crc_errors += delta.crc_errors;
        if delta.last_message_type != 0 {
            stats.last_message_type = delta.last_message_type;
        }
        if delta.last_frame_time_ms != 0 {
            stats.last_frame_time_ms = delta.last_frame_time_ms;
        }
        if stats.connection_start_ms > 0 {
            stats.total_uptime_ms = now_ms.saturating_sub(stats.connection_start_ms);
        }
        drop(stats);
        delta.clear();
    }

    /// Commit a failure pair. Observers that see a state change can always
    /// read the explanation afterwards.
    pub fn set_fault(&self, fault: &NtripFault) {
        let mut stats = self.lock();
        stats.last_error = Some(fault.kind);
        stats.last_error_message = fault.message.clone();
    }

    /// Clear the failure pair (reset, or a fresh connection).
    pub fn clear_fault(&self) {
        let mut stats = self.lock();
        stats.last_error = None;
        stats.last_error_message.clear();
    }

    /// Commit a successful handshake: bump reconnects, stamp the connection
    /// start, record the accepted revision, clear any stale failure.
    pub fn on_connected(&self, now_ms: u64, version: ProtocolVersion) {
        let mut stats = self.lock();
        stats.reconnects += 1;
        stats.connection_start_ms = now_ms;
        stats.protocol_version = version;
        stats.last_error = None;
        stats.last_error_message.clear();
    }

    pub fn set_protocol_version(&self, version: ProtocolVersion) {
        self.lock().protocol_version = version;
    }

    pub fn last_error(&self) -> Option<NtripError> {
        self.lock().last_error
    }

    pub fn error_message(&self) -> String {
        self.lock().last_error_message.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NtripStats> {
        // Poisoning only marks a panicked writer; the record is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
