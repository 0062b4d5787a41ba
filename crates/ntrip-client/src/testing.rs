//! Test support: an in-process fake caster and RTCM frame builders.
//!
//! [`FakeCaster`] binds a loopback listener and answers each accepted
//! connection with the next [`CasterScript`]: a scripted status line, header
//! block, body bytes, and an optional silent hold that keeps the socket open
//! without data (for zombie-stream scenarios). Once the scripts are
//! exhausted the listener is dropped, so further connection attempts are
//! refused, which is convenient for retry/lockout tests.
//!
//! Note that a client with Rev1 fallback enabled opens a *second* connection
//! after a rejected Rev2 handshake; rejection scenarios need one script per
//! request, not per logical attempt.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use rtcm_core::crc24q;

use crate::config::NtripConfig;

/// How one accepted connection is answered.
#[derive(Debug, Clone)]
pub struct CasterScript {
    /// Status line to send (without CRLF). `None` accepts the connection but
    /// never responds, for handshake-timeout scenarios.
    pub status_line: Option<String>,
    /// Header lines sent after the status line.
    pub headers: Vec<String>,
    /// Whether to send the blank line terminating the header block.
    pub send_blank_line: bool,
    /// Payload bytes streamed after the headers.
    pub body: Vec<u8>,
    /// How long to keep the socket open (and silent) after the body.
    pub hold_open: Duration,
}

impl CasterScript {
    /// Accept with `ICY 200 OK`, stream `body`, then hold the socket open.
    pub fn ok_with(body: Vec<u8>) -> Self {
        Self {
            status_line: Some("ICY 200 OK".into()),
            headers: Vec::new(),
            send_blank_line: true,
            body,
            hold_open: Duration::from_secs(60),
        }
    }

    /// Answer with the given status line and close.
    pub fn reject(status_line: &str) -> Self {
        Self {
            status_line: Some(status_line.into()),
            headers: Vec::new(),
            send_blank_line: false,
            body: Vec::new(),
            hold_open: Duration::ZERO,
        }
    }

    /// Accept the connection and never send a byte.
    pub fn mute() -> Self {
        Self {
            status_line: None,
            headers: Vec::new(),
            send_blank_line: false,
            body: Vec::new(),
            hold_open: Duration::from_secs(60),
        }
    }

    pub fn with_headers(mut self, headers: &[&str]) -> Self {
        self.headers = headers.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn without_blank_line(mut self) -> Self {
        self.send_blank_line = false;
        self
    }

    pub fn with_hold_open(mut self, hold: Duration) -> Self {
        self.hold_open = hold;
        self
    }
}

/// A scripted single-threaded caster on a loopback port.
pub struct FakeCaster {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeCaster {
    /// Bind a listener and serve each accepted connection from the next
    /// script, in order.
    pub async fn spawn(scripts: Vec<CasterScript>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let requests = Arc::new(Mutex::new(Vec::new()));

        let captured = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            for script in scripts {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                serve_connection(stream, script, &captured).await;
            }
            // Listener drops here; later connects are refused.
        });

        Ok(Self {
            addr,
            requests,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Raw request blocks received so far, one per accepted connection.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for FakeCaster {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    script: CasterScript,
    captured: &Mutex<Vec<String>>,
) {
    // Read the request block (bounded so a broken client cannot wedge the
    // caster task).
    let mut request = Vec::new();
    let mut chunk = [0u8; 512];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => request.extend_from_slice(&chunk[..n]),
            Ok(Err(_)) => break,
        }
    }
    captured
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(String::from_utf8_lossy(&request).into_owned());

    let Some(status) = script.status_line else {
        // Mute caster: hold the socket without answering.
        tokio::time::sleep(script.hold_open).await;
        return;
    };

    let mut response = format!("{status}\r\n");
    for header in &script.headers {
        response.push_str(header);
        response.push_str("\r\n");
    }
    if script.send_blank_line {
        response.push_str("\r\n");
    }
    if stream.write_all(response.as_bytes()).await.is_err() {
        return;
    }
    if !script.body.is_empty() && stream.write_all(&script.body).await.is_err() {
        return;
    }
    let _ = stream.flush().await;
    tokio::time::sleep(script.hold_open).await;
}

/// Build a well-formed RTCM 3.x frame carrying `message_type` with a
/// `payload_len`-byte payload (`payload_len >= 2`).
pub fn build_frame(message_type: u16, payload_len: usize) -> Vec<u8> {
    assert!((2..=1023).contains(&payload_len));
    let mut frame = vec![
        0xD3,
        (payload_len >> 8) as u8 & 0x03,
        (payload_len & 0xFF) as u8,
        (message_type >> 4) as u8,
        ((message_type & 0x0F) as u8) << 4,
    ];
    for i in 2..payload_len {
        frame.push(i as u8);
    }
    let crc = crc24q(&frame);
    frame.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
    frame
}

/// Build a frame whose last CRC byte is flipped.
pub fn corrupt_frame(message_type: u16, payload_len: usize) -> Vec<u8> {
    let mut frame = build_frame(message_type, payload_len);
    if let Some(last) = frame.last_mut() {
        *last ^= 0xFF;
    }
    frame
}

/// A cloneable sink capturing everything written to it.
#[derive(Debug, Clone, Default)]
pub struct CaptureSink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl io::Write for CaptureSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A configuration with fast timings pointed at a loopback caster.
pub fn test_config(addr: SocketAddr) -> NtripConfig {
    NtripConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        mount: "TEST".into(),
        user: "tester".into(),
        password: "secret".into(),
        gga_sentence: None,
        max_tries: 3,
        retry_delay_ms: 0,
        health_timeout_ms: 1_000,
        passive_sample_ms: 200,
        required_valid_frames: 2,
        buffer_size: 1024,
        connect_timeout_ms: 2_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameEvent;

    #[test]
    fn built_frames_parse_back() {
        let frame = build_frame(1005, 19);
        let mut parser = rtcm_core::RtcmParser::new();
        let events: Vec<_> = frame.iter().filter_map(|&b| parser.feed(b)).collect();
        assert_eq!(
            events,
            vec![FrameEvent::Valid {
                message_type: 1005,
                length: 19
            }]
        );
    }

    #[test]
    fn corrupt_frames_fail_crc() {
        let frame = corrupt_frame(1077, 30);
        let mut parser = rtcm_core::RtcmParser::new();
        let events: Vec<_> = frame.iter().filter_map(|&b| parser.feed(b)).collect();
        assert_eq!(events, vec![FrameEvent::CrcError { length: 30 }]);
    }

    #[tokio::test]
    async fn fake_caster_answers_and_records_request() {
        let caster = FakeCaster::spawn(vec![CasterScript::ok_with(b"payload".to_vec())])
            .await
            .unwrap();

        let mut stream = TcpStream::connect(caster.addr()).await.unwrap();
        stream
            .write_all(b"GET /TEST HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut response = vec![0u8; 256];
        let mut total = 0;
        while !response[..total].windows(7).any(|w| w == b"payload") {
            let n = stream.read(&mut response[total..]).await.unwrap();
            assert!(n > 0, "caster closed early");
            total += n;
        }
        let text = String::from_utf8_lossy(&response[..total]);
        assert!(text.starts_with("ICY 200 OK\r\n\r\n"));

        let requests = caster.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET /TEST"));
    }
}
