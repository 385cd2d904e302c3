//! Benchmarks for the cache file and the parse-to-DOM path.
//!
//! Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};

use lectern::cache::{BlockType, CacheFile, Compression};
use lectern::{Deadline, Document, MemStream, NullProgress};

/// A book-shaped HTML sample: many small paragraphs.
fn sample_html(paragraphs: usize) -> String {
    let mut out = String::from("<html><body>");
    for i in 0..paragraphs {
        out.push_str(&format!(
            "<p>Paragraph {i} with a <b>little</b> inline markup and enough \
             text to look like prose rather than filler.</p>"
        ));
    }
    out.push_str("</body></html>");
    out
}

fn compressible_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// ============================================================================
// Cache block I/O
// ============================================================================

fn bench_block_write_read(c: &mut Criterion) {
    let payload = compressible_payload(64 * 1024);
    c.bench_function("block_write_read_zlib", |b| {
        b.iter(|| {
            let mut cache = CacheFile::new(1, Compression::Zlib);
            cache.create(Box::new(MemStream::new())).unwrap();
            cache
                .write(BlockType::TextData, 0, &payload, true)
                .unwrap();
            cache.read(BlockType::TextData, 0).unwrap()
        });
    });
}

fn bench_block_rewrite_unchanged(c: &mut Criterion) {
    let payload = compressible_payload(64 * 1024);
    let mut cache = CacheFile::new(1, Compression::Zlib);
    cache.create(Box::new(MemStream::new())).unwrap();
    cache.write(BlockType::TextData, 0, &payload, true).unwrap();
    c.bench_function("block_rewrite_unchanged", |b| {
        // Hash short-circuit: this should be orders of magnitude
        // cheaper than the first write.
        b.iter(|| cache.write(BlockType::TextData, 0, &payload, true).unwrap());
    });
}

// ============================================================================
// Parse and save
// ============================================================================

fn bench_parse_html(c: &mut Criterion) {
    let html = sample_html(500);
    c.bench_function("parse_html_500p", |b| {
        b.iter(|| {
            let mut doc = Document::new();
            doc.parse_html(&html).unwrap();
            doc
        });
    });
}

fn bench_save_document(c: &mut Criterion) {
    let html = sample_html(500);
    c.bench_function("save_document_500p", |b| {
        b.iter(|| {
            let mut doc = Document::new();
            doc.parse_html(&html).unwrap();
            doc.create_cache(Box::new(MemStream::new())).unwrap();
            doc.save_changes(Deadline::none(), &mut NullProgress).unwrap();
            doc
        });
    });
}

criterion_group!(
    benches,
    bench_block_write_read,
    bench_block_rewrite_unchanged,
    bench_parse_html,
    bench_save_document
);
criterion_main!(benches);
