//! Error taxonomy for NTRIP sessions.
//!
//! Expected conditions (auth rejection, missing mount, zombie streams) are
//! normal transitions of the session state machine, not panics: they travel
//! as values and end up in the stats registry where observers can read them.

/// What went wrong, without the narrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NtripError {
    /// A required configuration field is empty or zero.
    #[error("invalid configuration")]
    InvalidConfig,
    /// TCP connect refused/reset, or the socket closed mid-stream.
    #[error("TCP connection failed")]
    TcpConnectFailed,
    /// Caster answered 401.
    #[error("authentication rejected")]
    HttpAuthFailed,
    /// Caster answered 404.
    #[error("mount point not found")]
    HttpMountNotFound,
    /// No status line arrived within the connect timeout.
    #[error("no response from caster")]
    HttpTimeout,
    /// A non-success status line matching none of the known cases.
    #[error("unexpected caster response")]
    HttpUnknownError,
    /// Validation phase ran out of time before enough valid frames arrived.
    #[error("stream validation failed")]
    StreamValidationFailed,
    /// Connection open but no freshness signal within the health timeout.
    #[error("zombie stream")]
    ZombieStream,
    /// Consecutive handshake failures reached the configured budget.
    #[error("maximum connection attempts exceeded")]
    MaxRetriesExceeded,
}

/// An [`NtripError`] kind paired with its human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct NtripFault {
    pub kind: NtripError,
    pub message: String,
}

impl NtripFault {
    pub fn new(kind: NtripError, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
