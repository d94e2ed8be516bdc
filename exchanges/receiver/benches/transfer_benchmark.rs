use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lan_file_sharer_protocol::Chunk;
use lfs_receiver::FileReceiver;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::TempDir;

const BENCHMARK_TIME_LIMIT: Duration = Duration::from_secs(10);

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(173) ^ i.wrapping_mul(11)) as u8).collect()
}

fn bench_sequential_chunk_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_chunk_writes");
    group.measurement_time(BENCHMARK_TIME_LIMIT);

    let chunk_size = 256 * 1024usize;
    let file_sizes = vec![("1MB", 1024 * 1024), ("4MB", 4 * 1024 * 1024)];

    for (name, size) in file_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("write_chunks", name), |b| {
            let rt = tokio::runtime::Runtime::new().unwrap();
            b.iter(|| {
                rt.block_on(async {
                    let dir = TempDir::new().unwrap();
                    let receiver = FileReceiver::new(dir.path());
                    let data = generate_test_data(size);
                    let hash = hex::encode(Sha256::digest(&data));

                    receiver
                        .register_file("bench", "bench.bin", size as u64, hash)
                        .await
                        .unwrap();

                    for (seq, piece) in data.chunks(chunk_size).enumerate() {
                        receiver
                            .write_chunk(Chunk {
                                file_id: "bench".into(),
                                file_name: "bench.bin".into(),
                                sequence_no: seq as u64,
                                offset: (seq * chunk_size) as u64,
                                data: black_box(piece.to_vec()),
                                total_size: size as u64,
                                expected_sha256_hex: String::new(),
                            })
                            .await
                            .unwrap();
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_out_of_order_chunk_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("out_of_order_chunk_writes");
    group.measurement_time(BENCHMARK_TIME_LIMIT);

    let chunk_size = 64 * 1024usize;
    let size = 2 * 1024 * 1024usize;

    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("reversed_order", |b| {
        let rt = tokio::runtime::Runtime::new().unwrap();
        b.iter(|| {
            rt.block_on(async {
                let dir = TempDir::new().unwrap();
                let receiver = FileReceiver::new(dir.path());
                let data = generate_test_data(size);
                let hash = hex::encode(Sha256::digest(&data));

                receiver
                    .register_file("bench", "bench.bin", size as u64, hash)
                    .await
                    .unwrap();

                let chunks: Vec<_> = data.chunks(chunk_size).enumerate().collect();
                for (seq, piece) in chunks.into_iter().rev() {
                    receiver
                        .write_chunk(Chunk {
                            file_id: "bench".into(),
                            file_name: "bench.bin".into(),
                            sequence_no: seq as u64,
                            offset: (seq * chunk_size) as u64,
                            data: black_box(piece.to_vec()),
                            total_size: size as u64,
                            expected_sha256_hex: String::new(),
                        })
                        .await
                        .unwrap();
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sequential_chunk_writes, bench_out_of_order_chunk_writes);
criterion_main!(benches);
