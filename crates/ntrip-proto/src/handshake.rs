//! NTRIP handshake wire format: request building and response
//! classification.
//!
//! The handshake is HTTP-shaped but not HTTP: casters may answer with an
//! `ICY 200 OK` shoutcast-style status line, and after the header block the
//! connection switches to a raw binary RTCM stream. Requests come in two
//! revisions, `Ntrip/2.0` over `HTTP/1.1` and the legacy revision over
//! `HTTP/1.0`, and a client typically tries Rev2 first, falling back to
//! Rev1 when the caster balks.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Client identifier advertised in the `User-Agent` header.
pub const CLIENT_ID: &str = concat!("ntrip-rs/", env!("CARGO_PKG_VERSION"));

/// NTRIP protocol revision of a request or an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtripRevision {
    Rev1,
    Rev2,
}

/// Inputs for building a mount-point request.
#[derive(Debug, Clone)]
pub struct RequestParams<'a> {
    pub host: &'a str,
    pub mount: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    /// Optional NMEA GGA sentence sent as an `Ntrip-GGA` header (Rev2 only)
    /// so network-RTK casters can pick a solution near the rover.
    pub gga_sentence: Option<&'a str>,
}

/// Render the full CRLF-delimited request block for one revision.
///
/// The returned string ends with the blank line that terminates the header
/// block; the caller writes it to the socket verbatim.
pub fn build_request(params: &RequestParams<'_>, revision: NtripRevision) -> String {
    let auth = BASE64.encode(format!("{}:{}", params.user, params.password));
    let mut request = String::with_capacity(256);

    match revision {
        NtripRevision::Rev2 => {
            request.push_str(&format!("GET /{} HTTP/1.1\r\n", params.mount));
            request.push_str(&format!("User-Agent: NTRIP {CLIENT_ID}\r\n"));
            request.push_str(&format!("Host: {}\r\n", params.host));
            request.push_str("Ntrip-Version: Ntrip/2.0\r\n");
            request.push_str(&format!("Authorization: Basic {auth}\r\n"));
            if let Some(gga) = params.gga_sentence
                && !gga.is_empty()
            {
                request.push_str(&format!("Ntrip-GGA: {gga}\r\n"));
            }
        }
        NtripRevision::Rev1 => {
            request.push_str(&format!("GET /{} HTTP/1.0\r\n", params.mount));
            request.push_str(&format!("User-Agent: NTRIP {CLIENT_ID}\r\n"));
            request.push_str(&format!("Authorization: Basic {auth}\r\n"));
        }
    }

    request.push_str("\r\n");
    request
}

/// Classification of the first non-empty response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// `ICY 200`, `HTTP/1.1 200`, or `HTTP/1.0 200`; stream follows.
    Ok,
    /// The line mentions 401.
    AuthFailed,
    /// The line mentions 404.
    MountNotFound,
    /// Anything else; the raw line is the only diagnostic.
    Unknown,
}

/// Classify a caster status line.
pub fn classify_status_line(line: &str) -> StatusClass {
    let line = line.trim();
    if line.starts_with("ICY 200")
        || line.starts_with("HTTP/1.1 200")
        || line.starts_with("HTTP/1.0 200")
    {
        return StatusClass::Ok;
    }
    if line.contains("401") {
        return StatusClass::AuthFailed;
    }
    if line.contains("404") {
        return StatusClass::MountNotFound;
    }
    StatusClass::Unknown
}
