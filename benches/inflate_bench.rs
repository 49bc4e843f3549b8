//! Benchmarks for the permessage-deflate inflate path
//!
//! Run with: cargo bench

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use sockudo_inflate::{
    ChannelSource, Config, DeflateConfig, FrameInfo, FramePart, MessageReader, Role,
};

fn payload(size: usize) -> Vec<u8> {
    let text = br#"{"event":"price","symbol":"BTC-USD","bid":67012.5,"ask":67013.0}"#;
    text.iter().copied().cycle().take(size).collect()
}

/// Benchmark in-memory decompression of a whole message
fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");
    let config = DeflateConfig {
        server_no_context_takeover: true,
        compression_threshold: 0,
        ..Default::default()
    };

    for size in [256, 4096, 65536, 1024 * 1024] {
        let data = payload(size);
        let compressed = config
            .encoder(Role::Server)
            .compress(&data)
            .unwrap()
            .unwrap();
        let mut decoder = config.decoder(Role::Client);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("message", size), &compressed, |b, input| {
            b.iter(|| decoder.decompress(black_box(input), 0).unwrap());
        });
    }

    group.finish();
}

/// Benchmark the async read loop over fragmented frames
fn bench_read_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_loop");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let config = DeflateConfig {
        client_no_context_takeover: true,
        compression_threshold: 0,
        ..Default::default()
    };

    for size in [4096, 65536] {
        let data = payload(size);
        let compressed = config
            .encoder(Role::Client)
            .compress(&data)
            .unwrap()
            .unwrap();
        let mut decoder = config.decoder(Role::Server);
        let mut reader = MessageReader::new(Config::default());
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("fragmented", size), &compressed, |b, input| {
            b.iter(|| {
                runtime.block_on(async {
                    let (tx, mut source) = ChannelSource::channel(64);
                    for (i, chunk) in input.chunks(512).enumerate() {
                        let fin = (i + 1) * 512 >= input.len();
                        tx.send(FramePart::Header(FrameInfo::new(chunk.len() as u64, fin)))
                            .await
                            .unwrap();
                        tx.send(FramePart::Payload(input.slice_ref(chunk)))
                            .await
                            .unwrap();
                    }

                    let mut out = BytesMut::with_capacity(size);
                    reader
                        .read_message(&mut decoder, &mut source, &mut out)
                        .await
                        .unwrap();
                    out
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decompress, bench_read_loop);
criterion_main!(benches);
