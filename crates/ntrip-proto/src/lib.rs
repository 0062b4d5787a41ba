//! Pure protocol state for NTRIP correction sessions.
//!
//! This crate holds the decision logic of an NTRIP client with no I/O
//! attached: building handshake requests and classifying caster responses,
//! tracking stream health across the validation and steady phases, and
//! gating reconnection attempts. Every function takes its inputs (including
//! the current time) explicitly and returns decisions for the caller to act
//! on.

pub mod error;
pub mod handshake;
pub mod health;
pub mod retry;

pub use error::{NtripError, NtripFault};
pub use handshake::{NtripRevision, RequestParams, StatusClass, build_request, classify_status_line};
pub use health::{HealthTracker, PASSIVE_SCAN_BYTES, StreamPhase, scan_for_preamble};
pub use retry::{RetryDecision, retry_gate};
