//! Two-phase stream health tracking with zombie detection.
//!
//! A freshly connected stream starts in the **validation** phase: every byte
//! is parsed and the stream must produce a configured number of CRC-valid
//! frames before it counts as proven. After promotion the tracker switches
//! to the **steady** phase, where health is maintained by periodically
//! scanning a bounded window of the most recent read for the frame preamble
//! instead of paying a CRC per payload byte.
//!
//! In both phases a freshness watermark records when evidence of live
//! correction data was last seen; the zombie predicate is the sole authority
//! for declaring the stream dead. All methods take `now_ms` explicitly;
//! the tracker owns no clock and does no I/O.

use rtcm_core::PREAMBLE;

/// Upper bound of the passive-sample scan window, in bytes.
///
/// Sized to cover at least one frame boundary at typical correction rates
/// (1–10 Hz, well under 1 KiB per frame).
pub const PASSIVE_SCAN_BYTES: usize = 128;

/// Phase of a connected stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Every byte is parsed; the stream has not yet proven itself.
    Validation,
    /// The stream is proven; health is sampled passively.
    Steady,
}

/// Scan the leading `min(len, PASSIVE_SCAN_BYTES)` bytes for the preamble.
pub fn scan_for_preamble(buf: &[u8]) -> bool {
    let limit = buf.len().min(PASSIVE_SCAN_BYTES);
    buf[..limit].contains(&PREAMBLE)
}

/// Health state for one connection.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    phase: StreamPhase,
    valid_frames: u32,
    required_frames: u32,
    health_timeout_ms: u64,
    passive_sample_ms: u64,
    /// When evidence of live data was last seen.
    last_health_ms: u64,
    /// When the last passive sample was taken.
    last_sample_ms: u64,
    /// When the current connection entered validation.
    phase_start_ms: u64,
}

impl HealthTracker {
    pub fn new(required_frames: u32, health_timeout_ms: u64, passive_sample_ms: u64) -> Self {
        Self {
            phase: StreamPhase::Validation,
            valid_frames: 0,
            required_frames,
            health_timeout_ms,
            passive_sample_ms,
            last_health_ms: 0,
            last_sample_ms: 0,
            phase_start_ms: 0,
        }
    }

    /// Re-arm for a fresh connection: validation phase, zero frames counted,
    /// watermark set to now.
    pub fn on_connect(&mut self, now_ms: u64) {
        self.phase = StreamPhase::Validation;
        self.valid_frames = 0;
        self.last_health_ms = now_ms;
        self.last_sample_ms = 0;
        self.phase_start_ms = now_ms;
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn valid_frames(&self) -> u32 {
        self.valid_frames
    }

    pub fn last_health_ms(&self) -> u64 {
        self.last_health_ms
    }

    /// Record a CRC-valid frame during validation.
    ///
    /// Returns `true` when this frame completes the validation quota and the
    /// tracker promotes to [`StreamPhase::Steady`].
    pub fn on_valid_frame(&mut self, now_ms: u64) -> bool {
        self.last_health_ms = now_ms;
        if self.phase != StreamPhase::Validation {
            return false;
        }
        self.valid_frames += 1;
        if self.valid_frames >= self.required_frames {
            self.phase = StreamPhase::Steady;
            self.last_sample_ms = now_ms;
            tracing::debug!(
                frames = self.valid_frames,
                elapsed_ms = now_ms.saturating_sub(self.phase_start_ms),
                "stream promoted to steady phase"
            );
            return true;
        }
        false
    }

    /// Milliseconds the current validation phase has been running.
    pub fn validation_latency_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.phase_start_ms)
    }

    /// Whether a passive sample is due (steady phase only).
    pub fn sample_due(&self, now_ms: u64) -> bool {
        self.phase == StreamPhase::Steady
            && now_ms.saturating_sub(self.last_sample_ms) > self.passive_sample_ms
    }

    /// Record the outcome of a passive sample.
    ///
    /// A preamble sighting refreshes the watermark and closes the sample
    /// window. A miss leaves the window open so the next read is sampled
    /// again; the zombie timeout alone decides when a miss becomes fatal.
    pub fn record_sample(&mut self, found_preamble: bool, now_ms: u64) {
        if found_preamble {
            self.last_health_ms = now_ms;
            self.last_sample_ms = now_ms;
        }
    }

    /// No freshness signal for longer than the health timeout.
    pub fn is_zombie(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_health_ms) > self.health_timeout_ms
    }

    /// Validation has run past twice the health timeout without promotion.
    ///
    /// This catches streams that trickle the occasional valid frame (each
    /// one refreshing the zombie watermark) yet never reach the required
    /// count. Streams delivering no valid frames at all trip
    /// [`is_zombie`](Self::is_zombie) first.
    pub fn validation_expired(&self, now_ms: u64) -> bool {
        self.phase == StreamPhase::Validation
            && now_ms.saturating_sub(self.phase_start_ms) > 2 * self.health_timeout_ms
    }
}
