//! Caster transport: TCP connect, NTRIP handshake, header drain.
//!
//! One call performs the whole exchange: open a socket, write one request,
//! read the status line, classify it, and drain the header block so the
//! first byte handed to the session is the first byte of the binary RTCM
//! stream. Header reads go byte-at-a-time: any read-ahead buffering here
//! would swallow payload bytes that belong downstream.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use ntrip_proto::{
    NtripError, NtripFault, NtripRevision, RequestParams, StatusClass, build_request,
    classify_status_line,
};

use crate::config::NtripConfig;

/// Header lines longer than this are truncated (the tail is still consumed).
const MAX_HEADER_LINE: usize = 1024;

/// An accepted caster connection, positioned at the first payload byte.
#[derive(Debug)]
pub struct CasterConnection {
    pub stream: TcpStream,
    pub revision: NtripRevision,
}

/// Connect and complete the handshake, trying Rev2 first.
///
/// With the `rev1-fallback` feature (default), any Rev2 failure closes the
/// socket and retries once with a legacy Rev1 request; the fault of the
/// final attempt is the one reported.
pub async fn connect_caster(cfg: &NtripConfig) -> Result<CasterConnection, NtripFault> {
    let fault = match connect_with_revision(cfg, NtripRevision::Rev2).await {
        Ok(stream) => {
            return Ok(CasterConnection {
                stream,
                revision: NtripRevision::Rev2,
            });
        }
        Err(fault) => fault,
    };

    if !cfg!(feature = "rev1-fallback") {
        return Err(fault);
    }

    warn!(error = %fault, "Rev2 handshake failed, falling back to Rev1");
    let stream = connect_with_revision(cfg, NtripRevision::Rev1).await?;
    Ok(CasterConnection {
        stream,
        revision: NtripRevision::Rev1,
    })
}

async fn connect_with_revision(
    cfg: &NtripConfig,
    revision: NtripRevision,
) -> Result<TcpStream, NtripFault> {
    let limit = Duration::from_millis(cfg.connect_timeout_ms);
    let target = format!("{}:{}", cfg.host, cfg.port);

    let mut stream = match tokio::time::timeout(limit, TcpStream::connect(target.as_str())).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(NtripFault::new(
                NtripError::TcpConnectFailed,
                format!("cannot reach {target}: {e}"),
            ));
        }
        Err(_) => {
            return Err(NtripFault::new(
                NtripError::TcpConnectFailed,
                format!("cannot reach {target}: connect timed out"),
            ));
        }
    };
    let _ = stream.set_nodelay(true);

    let params = RequestParams {
        host: &cfg.host,
        mount: &cfg.mount,
        user: &cfg.user,
        password: &cfg.password,
        gga_sentence: cfg.gga_sentence.as_deref(),
    };
    let request = build_request(&params, revision);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| {
            NtripFault::new(
                NtripError::TcpConnectFailed,
                format!("request write to {target} failed: {e}"),
            )
        })?;

    let line = match read_line(&mut stream, limit).await {
        LineRead::Line(line) => line,
        LineRead::Closed => {
            return Err(NtripFault::new(
                NtripError::TcpConnectFailed,
                format!("{} closed the connection during handshake", cfg.host),
            ));
        }
        LineRead::TimedOut => {
            return Err(NtripFault::new(
                NtripError::HttpTimeout,
                format!("no response from {}", cfg.host),
            ));
        }
    };
    debug!(?revision, status = %line, "caster response");

    match classify_status_line(&line) {
        StatusClass::Ok => {
            drain_headers(&mut stream, limit).await;
            Ok(stream)
        }
        StatusClass::AuthFailed => Err(NtripFault::new(
            NtripError::HttpAuthFailed,
            format!("invalid credentials for {}", cfg.host),
        )),
        StatusClass::MountNotFound => Err(NtripFault::new(
            NtripError::HttpMountNotFound,
            format!("mount not found: {}", cfg.mount),
        )),
        StatusClass::Unknown => Err(NtripFault::new(
            NtripError::HttpUnknownError,
            format!("HTTP error: {line}"),
        )),
    }
}

/// Consume header lines until the blank line that precedes the payload.
///
/// A caster that never sends the terminator only costs us the drain budget:
/// the connection is kept and the downstream may see stray ASCII, which
/// beats dropping an otherwise live stream.
async fn drain_headers(stream: &mut TcpStream, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            warn!("header drain timed out, proceeding with stream");
            return;
        }
        match read_line(stream, remaining).await {
            LineRead::Line(line) if line.is_empty() => {
                debug!("headers drained, binary stream follows");
                return;
            }
            LineRead::Line(header) => {
                debug!(%header, "caster header");
            }
            LineRead::Closed => return,
            LineRead::TimedOut => {
                warn!("header drain timed out, proceeding with stream");
                return;
            }
        }
    }
}

enum LineRead {
    /// A line arrived; leading/trailing whitespace (incl. `\r`) trimmed.
    Line(String),
    /// EOF or read error before the newline.
    Closed,
    TimedOut,
}

/// Read one `\n`-terminated line, one byte at a time.
async fn read_line(stream: &mut TcpStream, limit: Duration) -> LineRead {
    let deadline = tokio::time::Instant::now() + limit;
    let mut line: Vec<u8> = Vec::with_capacity(80);
    let mut byte = [0u8; 1];

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return LineRead::TimedOut;
        }
        match tokio::time::timeout(remaining, stream.read(&mut byte)).await {
            Ok(Ok(0)) => return LineRead::Closed,
            Ok(Ok(_)) => {
                if byte[0] == b'\n' {
                    return LineRead::Line(String::from_utf8_lossy(&line).trim().to_string());
                }
                if line.len() < MAX_HEADER_LINE {
                    line.push(byte[0]);
                }
            }
            Ok(Err(e)) => {
                debug!(error = %e, "read failed during handshake");
                return LineRead::Closed;
            }
            Err(_) => return LineRead::TimedOut,
        }
    }
}
