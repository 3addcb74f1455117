use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fontpipe_core::font::{decode_data_uri, encode, encode_chunked};
use fontpipe_core::raster::{count_differing_pixels, TextRasterizer};
use fontpipe_core::FontFormat;
use rand::{Rng, SeedableRng};

fn font_bytes(size: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let mut bytes = vec![0u8; size];
    rng.fill(&mut bytes[..]);
    bytes
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    // Typical subset, full Latin font, full CJK font
    for size in [50 * 1024, 512 * 1024, 4 * 1024 * 1024] {
        let bytes = font_bytes(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| encode(black_box(bytes), FontFormat::Ttf));
        });
    }
    group.finish();
}

fn bench_chunk_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_chunk_size");
    let bytes = font_bytes(1024 * 1024);

    for chunk in [3, 1024, 64 * 1024] {
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| encode_chunked(black_box(&bytes), FontFormat::Woff2, chunk));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_data_uri");

    for size in [50 * 1024, 512 * 1024] {
        let uri = encode(&font_bytes(size), FontFormat::Otf).unwrap();

        group.throughput(Throughput::Bytes(uri.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &uri, |b, uri| {
            b.iter(|| decode_data_uri(black_box(uri)));
        });
    }
    group.finish();
}

fn bench_raster_compare(c: &mut Criterion) {
    let baseline = TextRasterizer::synthetic(0.5).render("汉字测试", 30.0, 300, 100, (10.0, 50.0));
    let candidate = TextRasterizer::synthetic(0.62).render("汉字测试", 30.0, 300, 100, (10.0, 50.0));

    c.bench_function("count_differing_pixels_300x100", |b| {
        b.iter(|| count_differing_pixels(black_box(&baseline), black_box(&candidate)));
    });
}

criterion_group!(benches, bench_encode, bench_chunk_sizes, bench_decode, bench_raster_compare);
criterion_main!(benches);
