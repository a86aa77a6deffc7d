use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use par3rs::create::sequential_positions;
use par3rs::region::{region_size, RegionCodec};
use par3rs::{BlockMap, EngineConfig, Field, FieldWidth, RecoveryCreator, SilentReporter};
use std::hint::black_box;
use tempfile::TempDir;

/// Region multiply-add, the inner loop of both creation and repair
fn bench_region_multiply_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_multiply_add");

    for size in [4096usize, 65536, 1 << 20] {
        let input: Vec<u8> = (0..size).map(|i| (i * 13) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));

        for (name, field) in [("gf8", Field::gf8()), ("gf16", Field::gf16())] {
            group.bench_with_input(BenchmarkId::new(name, size), &input, |b, input| {
                let mut output = vec![0x55u8; size];
                b.iter(|| field.region_multiply_add(black_box(input), black_box(&mut output), 0x1234 & field.limit() as u16));
            });
        }
    }
    group.finish();
}

fn bench_region_parity(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_parity");
    let len = 65536;
    group.throughput(Throughput::Bytes(len as u64));

    for codec in [RegionCodec::Gf8, RegionCodec::Gf16, RegionCodec::Plain] {
        let mut region = vec![0xA5u8; region_size(len)];
        group.bench_function(format!("{:?}", codec), |b| {
            b.iter(|| {
                codec.create_parity(black_box(&mut region), len).unwrap();
                codec.check_parity(black_box(&region), len).unwrap();
            });
        });
    }
    group.finish();
}

/// Whole and split creation over a small on-disk set
fn bench_create(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("input.bin");
    let data: Vec<u8> = (0..64 * 16384u32).map(|i| (i.wrapping_mul(2654435761) >> 13) as u8).collect();
    std::fs::write(&input, &data).unwrap();
    let map = BlockMap::from_files(&[&input], 16384).unwrap();
    let output = dir.path().join("bench.par3");

    let mut group = c.benchmark_group("create");
    group.sample_size(10);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for (name, memory_limit) in [("whole", 0u64), ("split4", (16384 + 4) * 72 / 4)] {
        let config = EngineConfig::builder()
            .block_size(16384)
            .block_count(map.block_count())
            .recovery_block_count(8)
            .memory_limit(memory_limit)
            .field(FieldWidth::Gf16)
            .build()
            .unwrap();
        let positions = sequential_positions(&output, 0, 8, 16384);
        let reporter = SilentReporter::new();

        group.bench_function(name, |b| {
            b.iter(|| {
                RecoveryCreator::new(&config, &map, &reporter)
                    .unwrap()
                    .create(black_box(&positions))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_region_multiply_add, bench_region_parity, bench_create);
criterion_main!(benches);
