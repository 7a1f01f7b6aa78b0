#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use popstate::Compression;
use popstate::compression::{compress, decompress, registry};
use std::hint::black_box;

fn payload(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut id = 0u64;
    while out.len() < len {
        out.extend_from_slice(format!("{{\"suid\":{{\"id\":{id}}},\"m_age\":{}}},", id * 37 % 36500).as_bytes());
        id += 1;
    }
    out.truncate(len);
    out
}

fn bench_codecs(c: &mut Criterion) {
    let data = payload(4 * 1024 * 1024);
    let mut group = c.benchmark_group("Codecs");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.sample_size(20);

    for scheme in Compression::ALL {
        if registry().get(scheme).is_err() {
            continue;
        }
        let packed = compress(&data, scheme).expect("Failed to compress");

        group.bench_with_input(BenchmarkId::new("compress", scheme), &data, |b, data| {
            b.iter(|| black_box(compress(data, scheme).expect("Failed to compress")));
        });
        group.bench_with_input(BenchmarkId::new("decompress", scheme), &packed, |b, packed| {
            b.iter(|| black_box(decompress(packed, scheme).expect("Failed to decompress")));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_codecs);
criterion_main!(benches);
