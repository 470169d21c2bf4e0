//! Performance benchmarks for wisp-core.
//!
//! Run with: `cargo bench -p wisp-core`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use wisp_core::protocol::session_cipher;
use wisp_core::{AeadWriter, ClientPacketCodec, Method};
use wisp_transport::Destination;

fn bench_chunk_framing(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("chunk_framing");

    for method in Method::ALL {
        let cipher = session_cipher(method, &[0x42; 32], &[0x24; 32]).unwrap();
        let mut writer = AeadWriter::new(tokio::io::sink(), cipher);

        for size in [1400, 16384, 65535] {
            let data = vec![0xAB; size];
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new(method.name(), size), &size, |b, _| {
                b.iter(|| {
                    runtime.block_on(async {
                        writer.write_all(black_box(&data)).await.unwrap();
                    })
                })
            });
        }
    }

    group.finish();
}

fn bench_packet_encode(c: &mut Criterion) {
    let destination: Destination = "198.51.100.4:443".parse().unwrap();
    let payload = vec![0x5A; 1200];
    let mut group = c.benchmark_group("packet_encode");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for method in Method::ALL {
        let mut codec = ClientPacketCodec::new(method, &[0x42; 32]).unwrap();
        group.bench_function(method.name(), |b| {
            b.iter(|| codec.encode(black_box(&destination), black_box(&payload)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_framing, bench_packet_encode);
criterion_main!(benches);
