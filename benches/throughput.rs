use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;
use stream_backpressure::{OverflowPolicy, PipelineBuilder};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
        .expect("Runtime failed")
}

fn run(rt: &Runtime, builder: PipelineBuilder) -> usize {
    rt.block_on(async {
        let report = builder
            .build()
            .expect("Build failed")
            .start()
            .expect("Start failed")
            .run_to_end()
            .await
            .expect("Run failed");
        report.outputs.len()
    })
}

fn benchmark_unbounded_throughput(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("unbounded_10000_items", |b| {
        b.iter(|| {
            let builder = PipelineBuilder::new()
                .emit(10_000)
                .emission_interval(Duration::ZERO);
            black_box(run(&rt, builder))
        });
    });
}

fn benchmark_drop_oldest_throughput(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("drop_oldest_64_10000_items", |b| {
        b.iter(|| {
            let builder = PipelineBuilder::new()
                .overflow_policy(OverflowPolicy::DropOldest(64))
                .emit(10_000)
                .emission_interval(Duration::ZERO);
            black_box(run(&rt, builder))
        });
    });
}

fn benchmark_windowed_throughput(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("window_100_10000_items", |b| {
        b.iter(|| {
            let builder = PipelineBuilder::new()
                .emit(10_000)
                .emission_interval(Duration::ZERO)
                .window(100);
            black_box(run(&rt, builder))
        });
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(20);
    targets = benchmark_unbounded_throughput, benchmark_drop_oldest_throughput, benchmark_windowed_throughput
);
criterion_main!(benches);
