//! Ingest Stage Benchmarks
//!
//! Throughput of the CPU-bound stages that run before upload.
//!
//! Run with: `cargo bench --bench ingest_stages`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::Cursor;

use sip_ingest::hashing::ContentHasher;
use sip_ingest::inspect::tiff::count_pages;
use sip_ingest::metadata::MetadataExtractor;
use sip_ingest::worker::CancelFlag;

/// Little-endian TIFF with `pages` empty IFDs chained back to back
fn create_multipage_tiff(pages: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + pages * 6);
    out.extend_from_slice(b"II");
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());

    for page in 0..pages {
        let next = if page + 1 == pages {
            0
        } else {
            (out.len() + 6) as u32
        };
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&next.to_le_bytes());
    }
    out
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");
    let cancel = CancelFlag::new();

    for size in [64 * 1024, 4 * 1024 * 1024, 32 * 1024 * 1024] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            let hasher = ContentHasher::default();
            b.iter(|| {
                hasher
                    .hash_reader(Cursor::new(black_box(data)), &cancel, |_| {})
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_tiff_pages(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiff_pages");

    for pages in [1usize, 100, 10_000] {
        let data = create_multipage_tiff(pages);
        group.bench_with_input(BenchmarkId::from_parameter(pages), &data, |b, data| {
            b.iter(|| count_pages(Cursor::new(black_box(data))).unwrap())
        });
    }
    group.finish();
}

fn bench_metadata_scan(c: &mut Criterion) {
    // No recognizable container: measures the probe cost on opaque bytes
    let data = vec![0u8; 1024 * 1024];
    let extractor = MetadataExtractor::default();

    c.bench_function("metadata_scan_opaque_1mb", |b| {
        b.iter(|| extractor.extract_bytes(black_box(&data)))
    });
}

criterion_group!(benches, bench_hashing, bench_tiff_pages, bench_metadata_scan);
criterion_main!(benches);
