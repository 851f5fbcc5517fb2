//! Benchmark kernel generation latency through the dispatchers.
//!
//! Run with: cargo bench --bench generation_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use packed_jit::{
    getrf_kernel, pgemm_kernel, trsm_kernel, ArchLevel, GeneratedCode, GetrfDescriptor, PgemmDescriptor, Precision,
    TriangularDescriptor,
};

fn bench_pgemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("pgemm");
    for size in [4usize, 8, 16] {
        let desc = PgemmDescriptor::new(Precision::F32, size, size, size);
        for level in [ArchLevel::AVX, ArchLevel::AVX2, ArchLevel::AVX512_CORE] {
            let id = BenchmarkId::new(level.resolve().name().to_string(), size);
            group.bench_with_input(id, &desc, |b, desc| {
                b.iter(|| {
                    let mut code = GeneratedCode::new();
                    pgemm_kernel(&mut code, black_box(desc), level, None).unwrap();
                    black_box(code.len())
                })
            });
        }
    }
    group.finish();
}

fn bench_getrf(c: &mut Criterion) {
    let desc = GetrfDescriptor::new(Precision::F64, 8, 8);
    c.bench_function("getrf_8x8_hsw", |b| {
        b.iter(|| {
            let mut code = GeneratedCode::new();
            getrf_kernel(&mut code, black_box(&desc), ArchLevel::AVX2).unwrap();
            black_box(code.len())
        })
    });
}

fn bench_trsm(c: &mut Criterion) {
    let desc = TriangularDescriptor::new(Precision::F32, 8, 8);
    c.bench_function("trsm_8x8_skx", |b| {
        b.iter(|| {
            let mut code = GeneratedCode::new();
            trsm_kernel(&mut code, black_box(&desc), "skx").unwrap();
            black_box(code.len())
        })
    });
}

fn bench_rejection(c: &mut Criterion) {
    let desc = TriangularDescriptor::new(Precision::F32, 8, 8);
    c.bench_function("trsm_rejected", |b| {
        b.iter(|| {
            let mut code = GeneratedCode::new();
            let _ = trsm_kernel(&mut code, black_box(&desc), "zzz");
            black_box(code.len())
        })
    });
}

criterion_group!(benches, bench_pgemm, bench_getrf, bench_trsm, bench_rejection);
criterion_main!(benches);
