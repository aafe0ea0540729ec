//! Block storage benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use oheap_bench::utils::random_data;
use oheap_storage::{
    BlockDevice, BlockStorage, BlockStorageConfig, EncryptedBlockStorage, EncryptionConfig,
    MemoryBlockStorage, MemoryRegion,
};

const BLOCK_COUNT: u64 = 1024;

/// Benchmark raw block writes in memory.
fn bench_memory_write_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_write_block");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let region = MemoryRegion::new();
            let mut device =
                MemoryBlockStorage::setup(&region, &BlockStorageConfig::new(size, BLOCK_COUNT), None)
                    .unwrap();
            let data = random_data(size);
            let mut index = 0;

            b.iter(|| {
                device.write_block(black_box(index % BLOCK_COUNT), black_box(&data)).unwrap();
                index += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark encrypted block writes in memory.
fn bench_encrypted_write_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypted_write_block");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let region = MemoryRegion::new();
            let mut storage = EncryptedBlockStorage::<MemoryBlockStorage>::setup(
                &region,
                &BlockStorageConfig::new(size, BLOCK_COUNT),
                &EncryptionConfig::new(),
                None,
            )
            .unwrap();
            let data = random_data(size);
            let mut index = 0;

            b.iter(|| {
                storage.write_block(black_box(index % BLOCK_COUNT), black_box(&data)).unwrap();
                index += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark encrypted block reads in memory.
fn bench_encrypted_read_block(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypted_read_block");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let region = MemoryRegion::new();
            let storage = EncryptedBlockStorage::<MemoryBlockStorage>::setup(
                &region,
                &BlockStorageConfig::new(size, BLOCK_COUNT),
                &EncryptionConfig::new(),
                None,
            )
            .unwrap();
            let mut index = 0;

            b.iter(|| {
                let block = storage.read_block(black_box(index % BLOCK_COUNT)).unwrap();
                index += 1;
                black_box(block);
            });
        });
    }

    group.finish();
}

/// Benchmark device setup, which encrypts every block once.
fn bench_encrypted_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypted_setup");
    group.sample_size(20);

    for count in [256u64, 4096].iter() {
        group.throughput(Throughput::Bytes(count * 256));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let region = MemoryRegion::new();
                let storage = EncryptedBlockStorage::<MemoryBlockStorage>::setup(
                    &region,
                    &BlockStorageConfig::new(256, count),
                    &EncryptionConfig::new(),
                    None,
                )
                .unwrap();
                black_box(storage);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_memory_write_block,
    bench_encrypted_write_block,
    bench_encrypted_read_block,
    bench_encrypted_setup,
);
criterion_main!(benches);
