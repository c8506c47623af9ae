use futures::StreamExt;
use std::time::Duration;
use stream_backpressure::{
    Output, OverflowPolicy, PipelineBuilder, PipelineConfig, PipelineError, RateLimit, RunReport,
    Termination,
};
use tokio::time::Instant;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn seqs(report: &RunReport<u64>) -> Vec<u64> {
    report.outputs.iter().map(Output::seq).collect()
}

async fn run(builder: PipelineBuilder) -> RunReport<u64> {
    builder
        .build()
        .expect("Pipeline build failed")
        .start()
        .expect("Pipeline start failed")
        .run_to_end()
        .await
        .expect("Run failed")
}

#[tokio::test(start_paused = true)]
async fn test_drop_latest_keeps_initial_fill() {
    let report = run(PipelineBuilder::new()
        .overflow_policy(OverflowPolicy::DropLatest(10))
        .emit(100)
        .emission_interval(ms(5))
        .processing_delay(ms(150))
        .take(5))
    .await;

    // Five credits up front: the first five are pulled before the buffer fills
    assert_eq!(seqs(&report), vec![1, 2, 3, 4, 5]);
    assert_eq!(report.termination, Termination::UpstreamCancelled);
    assert_eq!(report.metrics.dropped, 0);
    assert!(report.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_drop_latest_under_single_demand() {
    let report = run(PipelineBuilder::new()
        .overflow_policy(OverflowPolicy::DropLatest(10))
        .emit(100)
        .emission_interval(ms(5))
        .processing_delay(ms(152)))
    .await;

    // Each freed slot goes to the next emission after the pull
    let mut expected: Vec<u64> = (1..=11).collect();
    expected.extend([32, 62, 93]);
    assert_eq!(seqs(&report), expected);
    assert_eq!(report.metrics.dropped, 86);
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_drop_oldest_keeps_newest() {
    let report = run(PipelineBuilder::new()
        .overflow_policy(OverflowPolicy::DropOldest(10))
        .emit(100)
        .emission_interval(ms(5))
        .processing_delay(ms(152)))
    .await;

    let delivered = seqs(&report);
    let mut expected = vec![1, 22, 52, 83];
    expected.extend(91..=100);
    assert_eq!(delivered, expected);
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_latest_only_delivers_most_recent() {
    let report = run(PipelineBuilder::new()
        .overflow_policy(OverflowPolicy::LatestOnly)
        .emit(30)
        .emission_interval(ms(10))
        .processing_delay(ms(103)))
    .await;

    assert_eq!(seqs(&report), vec![1, 11, 21, 30]);
    assert_eq!(report.metrics.dropped, 26);
}

#[tokio::test(start_paused = true)]
async fn test_latency_reflects_processing_delay() {
    let report = run(PipelineBuilder::new()
        .emit(5)
        .emission_interval(ms(1))
        .processing_delay(ms(150)))
    .await;

    assert_eq!(report.metrics.delivered, 5);
    assert!(report.metrics.latency_p50 >= ms(150));
    assert!(report.metrics.elapsed >= ms(750));
}

#[tokio::test(start_paused = true)]
async fn test_error_on_overflow_yields_error_once() {
    let report = run(PipelineBuilder::new()
        .overflow_policy(OverflowPolicy::ErrorOnOverflow(3))
        .emit(10)
        .emission_interval(ms(1))
        .processing_delay(ms(100)))
    .await;

    assert_eq!(seqs(&report), vec![1]);
    assert!(matches!(
        report.error,
        Some(PipelineError::Overflow { capacity: 3, seq: 5 })
    ));
    assert_eq!(report.termination, Termination::Overflow);
    assert_eq!(report.emitted, 5);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_preserves_order() {
    let report = run(PipelineBuilder::new()
        .emit(50)
        .emission_interval(ms(1))
        .processing_delay(ms(3)))
    .await;

    assert_eq!(seqs(&report), (1..=50).collect::<Vec<_>>());
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.metrics.delivered, 50);
    assert_eq!(report.metrics.dropped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_take_stops_infinite_producer() {
    let report = run(PipelineBuilder::new()
        .emit_forever()
        .emission_interval(ms(1))
        .take(5))
    .await;

    assert_eq!(seqs(&report), vec![1, 2, 3, 4, 5]);
    assert_eq!(report.emitted, 5);
    assert_eq!(report.termination, Termination::UpstreamCancelled);
}

#[tokio::test(start_paused = true)]
async fn test_sample_emits_latest_per_tick() {
    let report = run(PipelineBuilder::new()
        .emit_forever()
        .emission_interval(ms(10))
        .sample(ms(33))
        .take(3))
    .await;

    assert_eq!(seqs(&report), vec![3, 6, 9]);
}

#[tokio::test(start_paused = true)]
async fn test_window_batches() {
    let report = run(PipelineBuilder::new()
        .emit(50)
        .emission_interval(ms(20))
        .window(10))
    .await;

    assert_eq!(report.outputs.len(), 5);
    for (idx, output) in report.outputs.iter().enumerate() {
        let window = output.as_window().expect("window output");
        assert_eq!(window.len(), 10);
        assert_eq!(window.start_seq(), idx as u64 * 10 + 1);
    }
    assert_eq!(report.termination, Termination::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spacing() {
    let start = Instant::now();
    let report = run(PipelineBuilder::new()
        .emit_forever()
        .emission_interval(ms(10))
        .rate_limit(RateLimit::Spacing {
            min_interval: ms(50),
        })
        .take(3))
    .await;

    assert_eq!(seqs(&report), vec![1, 2, 3]);
    assert!(start.elapsed() >= ms(110));
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_limit_keeps_everything() {
    let report = run(PipelineBuilder::new()
        .emit(40)
        .emission_interval(ms(1))
        .rate_limit(RateLimit::Prefetch { prefetch: 10 })
        .take(30))
    .await;

    assert_eq!(seqs(&report), (1..=30).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_cancel_stops_stream() {
    let mut running = PipelineBuilder::new()
        .emit_forever()
        .emission_interval(ms(10))
        .build()
        .unwrap()
        .start()
        .unwrap();

    let first = running.next().await.unwrap().unwrap();
    assert_eq!(first.seq(), 1);
    running.cancel();

    // Already buffered items may still arrive before the stream ends
    while running.next().await.is_some() {}
    assert_eq!(running.termination(), Some(Termination::UpstreamCancelled));
    let emitted = running.shutdown().await.unwrap();
    assert!(emitted <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_pipeline_from_json_config() {
    let config = PipelineConfig::from_json(
        r#"{
            "overflowPolicy": "dropLatest",
            "capacity": 10,
            "emitCount": 100,
            "emissionIntervalMs": 5,
            "processingDelayMs": 150,
            "takeCount": 5
        }"#,
    )
    .unwrap();

    let report = run(PipelineBuilder::from_config(config)).await;
    assert_eq!(seqs(&report), vec![1, 2, 3, 4, 5]);
}
