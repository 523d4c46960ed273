//! Benchmarks for the workload the harness renders between writes.
//!
//! Run with: cargo bench
//!
//! One burst has to render well inside its own duration or the search
//! measures the synth instead of the output path. At 48kHz:
//!   - 96 frames  = 2.00ms deadline
//!   - 192 frames = 4.00ms deadline
//!   - 384 frames = 8.00ms deadline

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use saavy_mark::{
    latency::{LoadGenerator, VoicesMode},
    synth::Synthesizer,
};

const BURST_SIZES: &[usize] = &[96, 192, 384];
const VOICE_COUNTS: &[u32] = &[1, 8, 32, 128];

fn bench_synth(c: &mut Criterion) {
    let mut group = c.benchmark_group("synth/render");

    for &size in BURST_SIZES {
        let mut buffer = vec![0.0f32; size];
        for &voices in VOICE_COUNTS {
            let mut synth = Synthesizer::new(48_000.0, 256);
            synth.note_on(voices);

            let id = BenchmarkId::new(format!("{voices}v"), size);
            group.bench_with_input(id, &size, |b, _| {
                b.iter(|| synth.render(black_box(&mut buffer)))
            });
        }
    }
    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("load/voices_for_note");

    for mode in [VoicesMode::Switch, VoicesMode::LinearLoop, VoicesMode::Random] {
        let mut gen = LoadGenerator::new(mode, 8, 64, 1);
        let mut note = 0u32;
        group.bench_function(mode.to_string(), |b| {
            b.iter(|| {
                note = note.wrapping_add(1);
                black_box(gen.voices_for_note(black_box(note)))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_synth, bench_load);
criterion_main!(benches);
