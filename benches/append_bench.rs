use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use objfs::object_io::MemObjectStore;
use objfs::{Filesystem, FsConfig};
use std::sync::Arc;

fn append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");
    let config = FsConfig::for_tests();

    for block_count in [4u64, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(block_count), &block_count, |b, &block_count| {
            b.iter(|| {
                let fs = Filesystem::new(Arc::new(MemObjectStore::new()), config.clone());
                let chunk = vec![0x42u8; config.block_size as usize];
                let mut h = fs.open("/bench.dat", true).unwrap();
                for i in 0..block_count {
                    fs.write(&mut h, &chunk, i * config.block_size).unwrap();
                }
                fs.flush(&h).unwrap();
                fs.close(h);
                black_box(block_count);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, append_throughput);
criterion_main!(benches);
