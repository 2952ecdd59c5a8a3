//! Command round-trip benchmark suite.
//!
//! Measures bridge overhead against an in-memory echo host:
//! - Single command latency
//! - Concurrent commands in flight: 10, 100, 1000
//! - Native messaging frame encoding at several payload sizes
//!
//! Run with: cargo bench --bench round_trip
//! Results saved to: target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use futures_util::future::join_all;
use proxxy_bridge::transport::NativeMessageCodec;
use proxxy_bridge::{CommandBridge, MemoryTransport, Module};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const CONCURRENCY: &[usize] = &[10, 100, 1000];
const PAYLOAD_SIZES: &[usize] = &[64, 4 * 1024, 256 * 1024];

// ============================================================================
// Setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Connects a bridge to a host task that echoes each payload back.
fn echo_bridge(rt: &Runtime) -> CommandBridge {
    rt.block_on(async {
        let (transport, mut host) = MemoryTransport::pair();
        let bridge = CommandBridge::new(transport);
        bridge.connect().await.expect("connect to echo host");

        let mut end = host.accept().await.expect("echo link");
        tokio::spawn(async move {
            let _host = host;
            while let Some(command) = end.recv_command().await {
                let data = command.payload.unwrap_or(Value::Null);
                if end.reply_ok(command.id, data).is_err() {
                    break;
                }
            }
        });

        bridge
    })
}

// ============================================================================
// Benchmark: Command Round Trip
// ============================================================================

fn bench_single_command(c: &mut Criterion) {
    init_tracing();
    let rt = Runtime::new().expect("runtime");
    let bridge = echo_bridge(&rt);

    c.bench_function("round_trip/single", |b| {
        b.to_async(&rt).iter(|| async {
            bridge
                .send_command(Module::System, "ping", Some(json!({ "n": 1 })))
                .await
                .expect("echo")
        });
    });
}

fn bench_concurrent_commands(c: &mut Criterion) {
    init_tracing();
    let rt = Runtime::new().expect("runtime");
    let bridge = echo_bridge(&rt);

    let mut group = c.benchmark_group("round_trip/concurrent");

    for &count in CONCURRENCY {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async {
                let results = join_all((0..count).map(|n| {
                    bridge.send_command(Module::Har, "start", Some(json!({ "n": n })))
                }))
                .await;
                assert!(results.iter().all(Result::is_ok));
            });
        });
    }

    group.finish();
}

// ============================================================================
// Benchmark: Frame Codec
// ============================================================================

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for &size in PAYLOAD_SIZES {
        let message = json!({
            "id": "00000000-0000-4000-8000-000000000000",
            "success": true,
            "data": { "blob": "x".repeat(size) }
        });

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_decode", size), &message, |b, message| {
            let mut codec = NativeMessageCodec::default();
            let mut buffer = BytesMut::new();
            b.iter(|| {
                codec
                    .encode(message.clone(), &mut buffer)
                    .expect("encode");
                codec.decode(&mut buffer).expect("decode").expect("frame")
            });
        });
    }

    group.finish();
}

// ============================================================================
// Main
// ============================================================================

criterion_group!(benches, bench_single_command, bench_concurrent_commands, bench_codec);
criterion_main!(benches);
