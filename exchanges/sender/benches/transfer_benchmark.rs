use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lan_file_sharer_protocol::{Chunk, DataChannelMessage};
use std::time::Duration;

const BENCHMARK_TIME_LIMIT: Duration = Duration::from_secs(10);
const CHUNK_PAYLOAD_SIZE: usize = 1_400;

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(173) ^ i.wrapping_mul(11)) as u8).collect()
}

/// Measures the per-file cost of splitting and JSON-serializing the chunk
/// stream a sender pushes onto the data channel, independent of actual
/// network I/O.
fn bench_chunk_and_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_and_serialize");
    group.measurement_time(BENCHMARK_TIME_LIMIT);

    let file_sizes = vec![("1MB", 1024 * 1024), ("4MB", 4 * 1024 * 1024)];

    for (name, size) in file_sizes {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(BenchmarkId::new("mtu_chunks", name), |b| {
            let data = generate_test_data(size);
            b.iter(|| {
                for (seq, piece) in data.chunks(CHUNK_PAYLOAD_SIZE).enumerate() {
                    let chunk = Chunk {
                        file_id: "bench".into(),
                        file_name: "bench.bin".into(),
                        sequence_no: seq as u64,
                        offset: (seq * CHUNK_PAYLOAD_SIZE) as u64,
                        data: black_box(piece.to_vec()),
                        total_size: size as u64,
                        expected_sha256_hex: String::new(),
                    };
                    let bytes = DataChannelMessage::Chunk(chunk).to_bytes().unwrap();
                    black_box(bytes);
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_and_serialize);
criterion_main!(benches);
