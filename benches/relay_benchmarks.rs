//! Relay benchmarks
//!
//! Benchmarks the copy engine on plain and encrypted streams, and the
//! server datagram path.
//!
//! Run with: `cargo bench --bench relay_benchmarks`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::io::Cursor;
use wisp_core::protocol::session_cipher;
use wisp_core::{AeadReader, AeadWriter, ClientPacketCodec, Method, Service, ServiceConfig};
use wisp_integration_tests::{CaptureHandler, MemoryTransport, TEST_PSK};
use wisp_transport::endpoint::ReadOnlySource;
use wisp_transport::io::{IoSink, IoSource};
use wisp_transport::{Buffer, Destination, copy};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Plain stream copy, with and without the reader fast path
fn bench_copy(c: &mut Criterion) {
    let runtime = runtime();
    let mut group = c.benchmark_group("copy");

    for size in [64 * 1024, 1024 * 1024] {
        let data = vec![0xA5; size];
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("direct", size), &data, |b, data| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut source = IoSource::new(Cursor::new(data.as_slice()));
                    let mut sink = IoSink::new(tokio::io::sink());
                    black_box(copy(&mut sink, &mut source).await.unwrap());
                })
            })
        });

        group.bench_with_input(BenchmarkId::new("buffered", size), &data, |b, data| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut inner = IoSource::new(Cursor::new(data.as_slice()));
                    let mut source = ReadOnlySource::new(&mut inner);
                    let mut sink = IoSink::new(tokio::io::sink());
                    black_box(copy(&mut sink, &mut source).await.unwrap());
                })
            })
        });
    }

    group.finish();
}

/// Decrypting a chunk stream straight into a plain sink
fn bench_encrypted_drain(c: &mut Criterion) {
    let runtime = runtime();
    let mut group = c.benchmark_group("encrypted_drain");
    let salt = [0x24; 32];

    for method in Method::ALL {
        let size = 1024 * 1024;
        let wire = runtime.block_on(async {
            let mut writer =
                AeadWriter::new(Vec::new(), session_cipher(method, &TEST_PSK, &salt).unwrap());
            writer.write_all(&vec![0x3C; size]).await.unwrap();
            writer.into_inner()
        });
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(method.name()), &wire, |b, wire| {
            b.iter(|| {
                runtime.block_on(async {
                    let mut source = AeadReader::new(
                        wire.as_slice(),
                        session_cipher(method, &TEST_PSK, &salt).unwrap(),
                    );
                    let mut sink = IoSink::new(tokio::io::sink());
                    black_box(copy(&mut sink, &mut source).await.unwrap());
                })
            })
        });
    }

    group.finish();
}

/// Server-side datagram acceptance for an established session
fn bench_new_packet(c: &mut Criterion) {
    let runtime = runtime();
    let mut group = c.benchmark_group("new_packet");
    let destination: Destination = "192.0.2.53:53".parse().unwrap();
    let source = "198.51.100.20:40000".parse().unwrap();

    for method in Method::ALL {
        let (handler, _captured) = CaptureHandler::new();
        let service =
            Service::new(ServiceConfig::new(method, TEST_PSK.to_vec()), handler).unwrap();
        let transport = MemoryTransport::new("0.0.0.0:8388".parse().unwrap());
        let mut codec = ClientPacketCodec::new(method, &TEST_PSK).unwrap();
        group.throughput(Throughput::Bytes(1200));

        group.bench_function(method.name(), |b| {
            b.iter_batched(
                || codec.encode(&destination, &[0x11; 1200]).unwrap(),
                |packet| {
                    let _guard = runtime.enter();
                    service
                        .new_packet(transport.clone(), Buffer::from_slice(&packet), source)
                        .unwrap();
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_copy, bench_encrypted_drain, bench_new_packet);
criterion_main!(benches);
