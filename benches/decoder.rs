//! Frame decoder throughput.
//!
//! Feeds a 64 KiB stream through each framing mode, byte by byte and in
//! driver-sized chunks.
//!
//! Run with: cargo bench --bench decoder
//! Results saved to: target/criterion/

use std::hint::black_box;
use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rs485_link::{FrameDecoder, Framing};
use tokio::time::Instant;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const STREAM_LEN: usize = 64 * 1024;
const CHUNK_SIZES: &[usize] = &[1, 256];

fn framings() -> [(&'static str, Framing); 4] {
    [
        ("delimiter", Framing::Delimiter(b'\n')),
        ("count", Framing::Count(16)),
        ("timeout", Framing::InterByteTimeout(Duration::from_millis(5))),
        ("per_byte", Framing::PerByte),
    ]
}

/// Text-like stream with a newline every 32 bytes.
fn stream() -> Vec<u8> {
    (0..STREAM_LEN)
        .map(|i| if i % 32 == 31 { b'\n' } else { b'a' + (i % 26) as u8 })
        .collect()
}

// ============================================================================
// Benchmark: Decode
// ============================================================================

fn bench_decode(c: &mut Criterion) {
    let data = stream();
    let now = Instant::now();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(STREAM_LEN as u64));

    for (name, framing) in framings() {
        for &chunk in CHUNK_SIZES {
            group.bench_with_input(
                BenchmarkId::new(name, chunk),
                &chunk,
                |b, &chunk| {
                    b.iter(|| {
                        let mut decoder = FrameDecoder::new(framing);
                        let mut frames = 0usize;
                        for piece in data.chunks(chunk) {
                            frames += decoder.feed(black_box(piece), now).len();
                        }
                        black_box(frames)
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_decode);
criterion_main!(benches);
