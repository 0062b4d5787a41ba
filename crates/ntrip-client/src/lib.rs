//! Long-running NTRIP client for RTCM 3.x correction streams.
//!
//! The client maintains a correction-data session with an NTRIP caster,
//! validates the stream frame-by-frame until it has proven itself, forwards
//! the raw bytes to a downstream sink (typically a serial link to a GNSS
//! receiver), monitors stream health passively once validated, and recovers
//! across network failures with a bounded retry / lockout policy.
//!
//! A background worker owns the socket and the parser; any number of
//! observers may query state, health, and statistics concurrently and issue
//! control actions (`stop`, `reset`, `reconnect`) against it.

pub mod client;
pub mod config;
pub mod logging;
pub mod session;
pub mod shutdown;
pub mod sink;
pub mod stats;
pub mod testing;
pub mod transport;

pub use client::NtripClient;
pub use config::NtripConfig;
pub use session::SessionState;
pub use sink::CorrectionSink;
pub use stats::{NtripStats, ProtocolVersion};

pub use ntrip_proto::{NtripError, NtripFault, NtripRevision};
pub use rtcm_core::{FrameEvent, RtcmParser};
