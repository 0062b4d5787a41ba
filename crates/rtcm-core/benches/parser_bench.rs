//! Benchmarks for the RTCM frame parser hot path.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use rtcm_core::{FrameEvent, RtcmParser, crc24q};

fn build_frame(message_type: u16, payload_len: usize) -> Vec<u8> {
    let mut frame = vec![
        0xD3,
        (payload_len >> 8) as u8 & 0x03,
        (payload_len & 0xFF) as u8,
    ];
    frame.push((message_type >> 4) as u8);
    frame.push(((message_type & 0x0F) as u8) << 4);
    for i in 2..payload_len {
        frame.push(i as u8);
    }
    let crc = crc24q(&frame);
    frame.extend_from_slice(&[(crc >> 16) as u8, (crc >> 8) as u8, crc as u8]);
    frame
}

fn bench_parse_stream(c: &mut Criterion) {
    // A representative second of corrections: MSM7 observations plus a
    // station position frame.
    let mut stream = Vec::new();
    for _ in 0..10 {
        stream.extend_from_slice(&build_frame(1077, 600));
        stream.extend_from_slice(&build_frame(1087, 500));
    }
    stream.extend_from_slice(&build_frame(1005, 19));

    let mut group = c.benchmark_group("parser");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("feed_stream", |b| {
        b.iter(|| {
            let mut parser = RtcmParser::new();
            let mut valid = 0u32;
            for &byte in &stream {
                if let Some(FrameEvent::Valid { .. }) = parser.feed(black_box(byte)) {
                    valid += 1;
                }
            }
            black_box(valid)
        })
    });
    group.finish();
}

fn bench_crc(c: &mut Criterion) {
    let payload = vec![0x5Au8; 1024];
    let mut group = c.benchmark_group("crc24q");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("kilobyte", |b| b.iter(|| crc24q(black_box(&payload))));
    group.finish();
}

criterion_group!(benches, bench_parse_stream, bench_crc);
criterion_main!(benches);
