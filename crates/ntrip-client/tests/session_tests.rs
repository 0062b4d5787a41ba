//! End-to-end session scenarios against the scripted fake caster.

#![cfg(feature = "task")]

use std::time::Duration;

use ntrip_client::testing::{
    CaptureSink, CasterScript, FakeCaster, build_frame, corrupt_frame, test_config,
};
use ntrip_client::{NtripClient, NtripConfig, NtripError, ProtocolVersion, SessionState};

/// Poll `check` every 20 ms until it passes or `deadline` elapses.
async fn wait_for(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// Config pointed at the caster, with the zombie timeout opened up so slow
/// CI schedulers cannot trip it mid-assertion.
fn patient_config(addr: std::net::SocketAddr) -> NtripConfig {
    NtripConfig {
        health_timeout_ms: 10_000,
        ..test_config(addr)
    }
}

#[tokio::test]
async fn happy_path_validates_and_counts_frames() {
    ntrip_client::logging::init_for_tests();

    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1077, 40));
    let caster = FakeCaster::spawn(vec![CasterScript::ok_with(body)])
        .await
        .unwrap();

    let sink = CaptureSink::new();
    let client = NtripClient::new(patient_config(caster.addr()), sink.clone()).unwrap();
    assert!(client.start());

    assert!(
        wait_for(Duration::from_secs(5), || client.is_streaming()
            && client.is_healthy())
        .await,
        "stream never became healthy"
    );
    assert!(
        wait_for(Duration::from_secs(2), || client.stats().total_frames == 2).await,
        "frame counters never flushed"
    );

    let stats = client.stats();
    assert_eq!(stats.total_frames, 2);
    assert_eq!(stats.crc_errors, 0);
    assert_eq!(stats.last_message_type, 1077);
    assert_eq!(stats.protocol_version, ProtocolVersion::Rev2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.last_error, None);
    assert!(stats.bytes_received > 0);

    assert!(client.shutdown().await);
    assert!(!client.is_task_running());
}

#[tokio::test]
async fn rev1_fallback_session_reports_version_one() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1074, 30));
    let caster = FakeCaster::spawn(vec![
        CasterScript::reject("HTTP/1.1 400 Bad Request"),
        CasterScript::ok_with(body),
    ])
    .await
    .unwrap();

    let client = NtripClient::new(patient_config(caster.addr()), CaptureSink::new()).unwrap();
    assert!(client.start());

    assert!(
        wait_for(Duration::from_secs(5), || client.is_streaming()
            && client.is_healthy())
        .await
    );
    let stats = client.stats();
    assert_eq!(stats.protocol_version, ProtocolVersion::Rev1);
    assert_eq!(stats.reconnects, 1);

    client.shutdown().await;
}

#[tokio::test]
async fn repeated_auth_failures_lock_the_session_out() {
    // Each attempt costs two requests (Rev2 + Rev1 fallback); three attempts.
    let scripts = vec![CasterScript::reject("HTTP/1.1 401 Unauthorized"); 6];
    let caster = FakeCaster::spawn(scripts).await.unwrap();

    let mut cfg = test_config(caster.addr());
    cfg.retry_delay_ms = 200;
    let client = NtripClient::new(cfg, CaptureSink::new()).unwrap();
    assert!(client.start());

    // While attempts are burning down, the committed fault is the auth one.
    assert!(
        wait_for(Duration::from_secs(3), || {
            client.last_error() == Some(NtripError::HttpAuthFailed)
        })
        .await
    );

    assert!(
        wait_for(Duration::from_secs(5), || client.state()
            == SessionState::LockedOut)
        .await,
        "session never locked out"
    );
    // The lockout transition itself commits the budget-exhaustion fault.
    assert_eq!(client.last_error(), Some(NtripError::MaxRetriesExceeded));
    assert_eq!(client.stats().reconnects, 0);
    assert!(!client.is_healthy());

    // Lockout is sticky: nothing reconnects without an explicit reset.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client.state(), SessionState::LockedOut);

    client.shutdown().await;
}

#[tokio::test]
async fn zombie_stream_disconnects_then_recovers() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1077, 40));
    let caster = FakeCaster::spawn(vec![
        CasterScript::ok_with(body.clone()),
        CasterScript::ok_with(body),
    ])
    .await
    .unwrap();

    let mut cfg = test_config(caster.addr());
    cfg.health_timeout_ms = 600;
    // Leave a wide-open window between the zombie teardown and the next
    // attempt so the intermediate state is observable.
    cfg.retry_delay_ms = 2_000;
    let client = NtripClient::new(cfg, CaptureSink::new()).unwrap();
    assert!(client.start());

    assert!(
        wait_for(Duration::from_secs(3), || client.is_healthy()).await,
        "first connection never validated"
    );

    // The caster goes silent while keeping TCP open; the zombie timeout
    // tears the session down.
    assert!(
        wait_for(Duration::from_secs(3), || {
            client.state() == SessionState::Disconnected
                && client.last_error() == Some(NtripError::ZombieStream)
        })
        .await,
        "zombie was never detected"
    );
    assert!(!client.is_healthy());

    // After the retry window the session reconnects and clears the fault.
    assert!(
        wait_for(Duration::from_secs(6), || {
            client.is_healthy() && client.stats().reconnects == 2
        })
        .await,
        "session never recovered from the zombie"
    );
    assert_eq!(client.last_error(), None);

    client.shutdown().await;
}

#[tokio::test]
async fn crc_garbage_is_counted_not_fatal() {
    // Two valid frames then a corrupt one, three times over. With a quota of
    // six the whole pattern is parsed during validation: promotion lands on
    // the eighth frame, before the final corrupt one.
    let mut body = Vec::new();
    for _ in 0..3 {
        body.extend_from_slice(&build_frame(1074, 24));
        body.extend_from_slice(&build_frame(1084, 24));
        body.extend_from_slice(&corrupt_frame(1094, 24));
    }
    let caster = FakeCaster::spawn(vec![CasterScript::ok_with(body.clone())])
        .await
        .unwrap();

    let mut cfg = patient_config(caster.addr());
    cfg.required_valid_frames = 6;
    let sink = CaptureSink::new();
    let client = NtripClient::new(cfg, sink.clone()).unwrap();
    assert!(client.start());

    assert!(
        wait_for(Duration::from_secs(5), || client.is_healthy()).await,
        "corrupt frames must not block validation"
    );
    assert!(
        wait_for(Duration::from_secs(2), || {
            let stats = client.stats();
            stats.total_frames == 6 && stats.crc_errors == 2
        })
        .await,
        "unexpected counters: {:?}",
        client.stats()
    );
    assert!(client.is_streaming());

    // Every byte reached the sink, corrupt frames included, plus bytes that
    // arrived after promotion. Forwarding precedes parsing.
    assert!(
        wait_for(Duration::from_secs(2), || sink.contents() == body).await,
        "sink did not receive the verbatim stream"
    );

    client.shutdown().await;
}

#[tokio::test]
async fn header_bytes_never_reach_the_sink() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1097, 64));
    let headers: Vec<String> = (0..25)
        .map(|i| format!("X-Verbose-Header-{i}: some caster chatter"))
        .collect();
    let header_refs: Vec<&str> = headers.iter().map(String::as_str).collect();
    let caster = FakeCaster::spawn(vec![
        CasterScript::ok_with(body.clone()).with_headers(&header_refs),
    ])
    .await
    .unwrap();

    let sink = CaptureSink::new();
    let client = NtripClient::new(patient_config(caster.addr()), sink.clone()).unwrap();
    assert!(client.start());

    assert!(
        wait_for(Duration::from_secs(5), || sink.contents().len() >= body.len()).await,
        "stream never reached the sink"
    );
    let forwarded = sink.contents();
    assert_eq!(forwarded[0], 0xD3, "header ASCII leaked to the sink");
    assert_eq!(forwarded, body);

    client.shutdown().await;
}

#[tokio::test]
async fn reconnect_bypasses_the_retry_delay() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1077, 40));
    let caster = FakeCaster::spawn(vec![
        CasterScript::ok_with(body.clone()),
        CasterScript::ok_with(body),
    ])
    .await
    .unwrap();

    let mut cfg = patient_config(caster.addr());
    cfg.retry_delay_ms = 60_000;
    let client = NtripClient::new(cfg, CaptureSink::new()).unwrap();
    assert!(client.start());

    assert!(wait_for(Duration::from_secs(3), || client.is_healthy()).await);
    assert_eq!(client.stats().reconnects, 1);

    client.reconnect();

    // A 60 s retry delay would make this unreachable without the forced
    // attempt.
    assert!(
        wait_for(Duration::from_secs(4), || {
            client.is_healthy() && client.stats().reconnects == 2
        })
        .await,
        "forced reconnect did not happen"
    );

    client.shutdown().await;
}

#[tokio::test]
async fn stop_locks_out_and_reset_recovers() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1077, 40));
    let caster = FakeCaster::spawn(vec![
        CasterScript::ok_with(body.clone()),
        CasterScript::ok_with(body),
    ])
    .await
    .unwrap();

    let client = NtripClient::new(patient_config(caster.addr()), CaptureSink::new()).unwrap();
    assert!(client.start());
    assert!(wait_for(Duration::from_secs(3), || client.is_healthy()).await);

    client.stop();
    assert!(
        wait_for(Duration::from_secs(2), || {
            client.state() == SessionState::LockedOut && !client.is_healthy()
        })
        .await
    );
    // Sticky until reset.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client.state(), SessionState::LockedOut);

    client.reset();
    assert_eq!(client.last_error(), None);
    assert!(
        wait_for(Duration::from_secs(4), || {
            client.is_healthy() && client.stats().reconnects == 2
        })
        .await,
        "session did not recover after reset"
    );

    client.shutdown().await;
}

#[tokio::test]
async fn second_start_is_rejected_while_worker_runs() {
    let caster = FakeCaster::spawn(vec![CasterScript::ok_with(build_frame(1005, 19))])
        .await
        .unwrap();
    let client = NtripClient::new(patient_config(caster.addr()), CaptureSink::new()).unwrap();

    assert!(client.start());
    assert!(!client.start());
    assert!(client.is_task_running());

    assert!(client.shutdown().await);
    assert!(!client.is_task_running());

    // After a clean shutdown the worker slot is free again.
    assert!(client.start());
    client.shutdown().await;
}

#[tokio::test]
async fn socket_close_mid_stream_reconnects() {
    let mut body = build_frame(1005, 19);
    body.extend_from_slice(&build_frame(1077, 40));
    let caster = FakeCaster::spawn(vec![
        // First connection: stream, then hang up quickly.
        CasterScript::ok_with(body.clone()).with_hold_open(Duration::from_millis(300)),
        CasterScript::ok_with(body),
    ])
    .await
    .unwrap();

    let client = NtripClient::new(patient_config(caster.addr()), CaptureSink::new()).unwrap();
    assert!(client.start());
    assert!(wait_for(Duration::from_secs(3), || client.is_healthy()).await);

    // The caster drops the socket; the session must notice, record the TCP
    // fault, and re-establish on the second script.
    assert!(
        wait_for(Duration::from_secs(5), || {
            client.is_healthy() && client.stats().reconnects == 2
        })
        .await,
        "session did not survive the hangup"
    );

    client.shutdown().await;
}
