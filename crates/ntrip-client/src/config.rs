//! Session configuration.

use ntrip_proto::{NtripError, NtripFault};
use serde::Deserialize;

/// Configuration for one NTRIP session, immutable after the session starts.
///
/// Deserializable with per-field defaults so embedders can load it straight
/// from a TOML/JSON document, but this crate itself never touches the
/// filesystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NtripConfig {
    /// Caster hostname or IP address.
    pub host: String,
    /// Caster TCP port.
    pub port: u16,
    /// Mount point to request.
    pub mount: String,
    /// Username for Basic auth (many community casters want an email here).
    pub user: String,
    /// Password for Basic auth.
    pub password: String,
    /// Optional NMEA GGA sentence sent as a position hint (Rev2 requests).
    pub gga_sentence: Option<String>,
    /// Consecutive handshake failures tolerated before lockout.
    pub max_tries: u32,
    /// Delay between connection attempts.
    pub retry_delay_ms: u64,
    /// Zombie-stream detection timeout.
    pub health_timeout_ms: u64,
    /// Passive health sample interval in the steady phase.
    pub passive_sample_ms: u64,
    /// CRC-valid frames required before the stream counts as healthy.
    pub required_valid_frames: u32,
    /// TCP read buffer size in bytes.
    pub buffer_size: usize,
    /// Bound on TCP connect, handshake response, and header drain.
    pub connect_timeout_ms: u64,
}

impl Default for NtripConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 2101,
            mount: String::new(),
            user: String::new(),
            password: String::new(),
            gga_sentence: None,
            max_tries: 5,
            retry_delay_ms: 30_000,
            health_timeout_ms: 60_000,
            passive_sample_ms: 5_000,
            required_valid_frames: 3,
            buffer_size: 1024,
            connect_timeout_ms: 5_000,
        }
    }
}

impl NtripConfig {
    /// Check the invariants a session depends on.
    ///
    /// Callable before constructing a client; [`NtripClient::new`] runs the
    /// same check and refuses to start a session on violation.
    ///
    /// [`NtripClient::new`]: crate::NtripClient::new
    pub fn validate(&self) -> Result<(), NtripFault> {
        let problem = if self.host.is_empty() {
            "host is empty"
        } else if self.mount.is_empty() {
            "mount is empty"
        } else if self.port == 0 {
            "port is zero"
        } else if self.buffer_size == 0 {
            "buffer_size is zero"
        } else if self.connect_timeout_ms == 0 {
            "connect_timeout_ms is zero"
        } else if self.max_tries == 0 {
            "max_tries is zero"
        } else if self.health_timeout_ms == 0 {
            "health_timeout_ms is zero"
        } else if self.required_valid_frames == 0 {
            "required_valid_frames is zero"
        } else {
            return Ok(());
        };
        Err(NtripFault::new(NtripError::InvalidConfig, problem))
    }
}
