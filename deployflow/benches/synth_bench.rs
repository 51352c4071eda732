//! Benchmarks for topology validation and synthesis.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deployflow::config::PipelineConfig;
use deployflow::pipeline::sample_pipeline;
use deployflow::synth::synthesize;

fn synth_benchmark(c: &mut Criterion) {
    let config = PipelineConfig::default();

    c.bench_function("sample_pipeline", |b| {
        b.iter(|| sample_pipeline(black_box(&config)))
    });

    let definition = sample_pipeline(&config).expect("default config is valid");
    c.bench_function("synthesize", |b| {
        b.iter(|| {
            synthesize(black_box(&definition))
                .map(|t| t.to_json_string())
        })
    });
}

criterion_group!(benches, synth_benchmark);
criterion_main!(benches);
