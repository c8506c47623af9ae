use crate::buffer::Buffer;
use crate::config::PipelineConfig;
use crate::consumer::{Consumer, Delay};
use crate::error::{PipelineError, Result};
use crate::handle::{CancelOnDrop, PipelineHandle, Termination};
use crate::item::Item;
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::policy::OverflowPolicy;
use crate::producer::Producer;
use crate::rate_limit::{RateLimit, RateLimiter};
use crate::sampler::Sampler;
use crate::window::{Window, Windower};
use async_stream::stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One element handed to the caller of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output<T> {
    Item(Item<T>),
    Window(Item<Window<T>>),
}

impl<T> Output<T> {
    /// Sequence index of the item, or the window number
    pub fn seq(&self) -> u64 {
        match self {
            Output::Item(item) => item.seq(),
            Output::Window(window) => window.seq(),
        }
    }

    pub fn as_item(&self) -> Option<&Item<T>> {
        match self {
            Output::Item(item) => Some(item),
            Output::Window(_) => None,
        }
    }

    pub fn as_window(&self) -> Option<&Window<T>> {
        match self {
            Output::Item(_) => None,
            Output::Window(window) => Some(window.value()),
        }
    }
}

impl<T: fmt::Display> fmt::Display for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Output::Item(item) => write!(f, "{item}"),
            Output::Window(window) => write!(f, "{window}"),
        }
    }
}

/// Builder for configuring a run
#[derive(Debug, Clone, Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.set_overflow_policy(policy);
        self
    }

    /// Emit exactly `count` items
    pub fn emit(mut self, count: u64) -> Self {
        self.config.emit_count = Some(count);
        self
    }

    /// Emit until the run is cancelled
    pub fn emit_forever(mut self) -> Self {
        self.config.emit_count = None;
        self
    }

    pub fn emission_interval(mut self, interval: Duration) -> Self {
        self.config.emission_interval = interval;
        self
    }

    /// Time the consumer spends on every item it receives
    pub fn processing_delay(mut self, delay: Duration) -> Self {
        self.config.processing_delay = delay;
        self
    }

    /// Accept `n` items, then cancel upstream
    pub fn take(mut self, n: u64) -> Self {
        self.config.take_count = Some(n);
        self
    }

    pub fn window(mut self, size: usize) -> Self {
        self.config.window_size = Some(size);
        self
    }

    pub fn sample(mut self, interval: Duration) -> Self {
        self.config.sample_interval = Some(interval);
        self
    }

    pub fn rate_limit(mut self, limit: RateLimit) -> Self {
        self.config.rate_limit = Some(limit);
        self
    }

    /// Validate the configuration
    pub fn build(self) -> Result<Pipeline> {
        self.config.validate()?;
        let policy = self.config.overflow_policy()?;
        Ok(Pipeline {
            config: self.config,
            policy,
        })
    }
}

/// A validated run description, ready to start
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    policy: OverflowPolicy,
}

impl Pipeline {
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Start a run whose values are their own sequence indices.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> Result<RunningPipeline<u64>> {
        self.start_with(|seq| seq)
    }

    /// Start a run, deriving each emitted value from its sequence index.
    ///
    /// The producer is spawned immediately and emits on its own timeline; the
    /// stages downstream of the buffer only advance while the returned stream is
    /// polled.
    pub fn start_with<T, F>(self, value_fn: F) -> Result<RunningPipeline<T>>
    where
        T: Clone + Send + 'static,
        F: FnMut(u64) -> T + Send + 'static,
    {
        let Pipeline { config, policy } = self;

        let buffer = Buffer::new(policy)?;
        let limiter = config.rate_limit.map(RateLimiter::new).transpose()?;
        let sampler = config.sample_interval.map(Sampler::new).transpose()?;
        let windower = config.window_size.map(Windower::new).transpose()?;
        let handle = PipelineHandle::new();
        let metrics = PipelineMetrics::new();

        info!(
            policy = %policy,
            emit_count = ?config.emit_count,
            take_count = ?config.take_count,
            "starting pipeline"
        );

        let producer = Producer::new(config.emit_count, config.emission_interval, value_fn)
            .spawn(buffer.clone(), handle.clone());

        let released = release(buffer.clone(), limiter).boxed();
        let sampled = match sampler {
            Some(sampler) => sampler.sample(released).boxed(),
            None => released,
        };
        let staged = match windower {
            Some(windower) => windower
                .window(sampled)
                .map(|next| next.map(Output::Window))
                .boxed(),
            None => sampled.map(|next| next.map(Output::Item)).boxed(),
        };

        let mut consumer =
            Consumer::<_, Output<T>>::new(Delay::new(config.processing_delay))
                .with_metrics(metrics.clone());
        if let Some(n) = config.take_count {
            consumer = consumer.take(n);
        }
        let outputs = consumer.consume(staged, handle.clone());

        Ok(RunningPipeline {
            outputs,
            _guard: handle.cancel_on_drop(),
            handle,
            buffer,
            metrics,
            producer: Some(producer),
            termination: None,
        })
    }
}

/// Hand buffered items downstream one at a time, gated by the rate limiter if any.
///
/// A release slot is only reserved once an item is waiting, so the limiter's
/// spacing applies to actual releases. Everything not yet released stays in the
/// buffer under its overflow policy.
fn release<T: Send + 'static>(
    buffer: Buffer<T>,
    limiter: Option<RateLimiter>,
) -> impl Stream<Item = Result<Item<T>>> {
    stream! {
        loop {
            buffer.ready().await;
            if let Some(limiter) = &limiter {
                limiter.acquire_next().await;
            }
            match buffer.recv().await {
                Some(Ok(item)) => yield Ok(item),
                Some(Err(err)) => {
                    yield Err(err);
                    break;
                }
                None => break,
            }
        }
    }
}

/// Everything a run produced, gathered once it ended
#[derive(Debug)]
pub struct RunReport<T> {
    pub outputs: Vec<Output<T>>,
    /// The error that terminated the run, if any
    pub error: Option<PipelineError>,
    pub termination: Termination,
    /// Items the producer emitted
    pub emitted: u64,
    pub metrics: MetricsSnapshot,
}

impl<T> RunReport<T> {
    pub fn values(&self) -> Vec<&T> {
        self.outputs
            .iter()
            .filter_map(Output::as_item)
            .map(Item::value)
            .collect()
    }
}

/// A started run. Poll it as a stream of outputs; dropping it cancels the run.
pub struct RunningPipeline<T> {
    outputs: BoxStream<'static, Result<Output<T>>>,
    handle: PipelineHandle,
    buffer: Buffer<T>,
    metrics: PipelineMetrics,
    producer: Option<JoinHandle<Result<u64>>>,
    termination: Option<Termination>,
    _guard: CancelOnDrop,
}

impl<T> RunningPipeline<T> {
    pub fn handle(&self) -> &PipelineHandle {
        &self.handle
    }

    /// Cancel the run. The producer stops before its next emission.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// How the run ended, once the output stream is exhausted
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.buffer.stats())
    }

    /// Drive the run to its end and collect everything it produced
    pub async fn run_to_end(mut self) -> Result<RunReport<T>> {
        let mut outputs = Vec::new();
        let mut error = None;
        while let Some(next) = self.next().await {
            match next {
                Ok(output) => outputs.push(output),
                Err(err) => error = Some(err),
            }
        }

        let termination = self.termination.unwrap_or(Termination::Completed);
        let metrics = self.metrics();
        let emitted = self.shutdown().await?;
        debug!(%termination, emitted, delivered = metrics.delivered, "run finished");

        Ok(RunReport {
            outputs,
            error,
            termination,
            emitted,
            metrics,
        })
    }

    /// Cancel the run and wait for the producer to stop, returning how many items it emitted
    pub async fn shutdown(mut self) -> Result<u64> {
        self.handle.cancel();
        if let Some(producer) = self.producer.take() {
            let outcome = producer
                .await
                .map_err(|err| PipelineError::TaskError(err.to_string()))?;
            match outcome {
                Ok(emitted) => debug!(emitted, "producer joined"),
                // Already surfaced through the output stream
                Err(err) if err.is_overflow() => {}
                Err(err) => warn!(error = %err, "producer stopped with an error"),
            }
        }
        Ok(self.buffer.offered_count())
    }
}

impl<T> Stream for RunningPipeline<T> {
    type Item = Result<Output<T>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.termination.is_some() {
            return Poll::Ready(None);
        }
        match this.outputs.poll_next_unpin(cx) {
            Poll::Ready(Some(Err(err))) => {
                if err.is_overflow() {
                    this.termination = Some(Termination::Overflow);
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                let termination = if this.handle.is_cancelled() {
                    Termination::UpstreamCancelled
                } else {
                    Termination::Completed
                };
                this.termination = Some(termination);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<T> fmt::Debug for RunningPipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningPipeline")
            .field("policy", &self.buffer.policy())
            .field("buffered", &self.buffer.len())
            .field("cancelled", &self.handle.is_cancelled())
            .field("termination", &self.termination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn seqs(report: &RunReport<u64>) -> Vec<u64> {
        report.outputs.iter().map(Output::seq).collect()
    }

    #[test]
    fn test_build_rejects_missing_capacity() {
        let mut config = PipelineConfig::default();
        config.overflow_policy = crate::config::PolicyKind::DropOldest;
        assert!(PipelineBuilder::from_config(config).build().is_err());
    }

    #[test]
    fn test_build_rejects_zero_window() {
        assert!(PipelineBuilder::new().window(0).build().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_delivers_everything_in_order() {
        let report = PipelineBuilder::new()
            .emit(20)
            .emission_interval(ms(1))
            .processing_delay(ms(5))
            .build()
            .unwrap()
            .start()
            .unwrap()
            .run_to_end()
            .await
            .unwrap();
        assert_eq!(seqs(&report), (1..=20).collect::<Vec<_>>());
        assert_eq!(report.values().into_iter().sum::<u64>(), 210);
        assert_eq!(report.termination, Termination::Completed);
        assert_eq!(report.emitted, 20);
        assert_eq!(report.metrics.dropped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_on_infinite_source_stops_producer() {
        let report = PipelineBuilder::new()
            .emission_interval(ms(1))
            .take(5)
            .build()
            .unwrap()
            .start()
            .unwrap()
            .run_to_end()
            .await
            .unwrap();
        assert_eq!(seqs(&report), vec![1, 2, 3, 4, 5]);
        assert_eq!(report.termination, Termination::UpstreamCancelled);
        assert!(report.emitted >= 5);
        assert!(report.emitted <= 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_on_overflow_terminates() {
        let report = PipelineBuilder::new()
            .overflow_policy(OverflowPolicy::ErrorOnOverflow(3))
            .emit(10)
            .emission_interval(ms(1))
            .processing_delay(ms(100))
            .build()
            .unwrap()
            .start()
            .unwrap()
            .run_to_end()
            .await
            .unwrap();
        assert_eq!(seqs(&report), vec![1]);
        assert!(matches!(
            report.error,
            Some(PipelineError::Overflow { capacity: 3, seq: 5 })
        ));
        assert_eq!(report.termination, Termination::Overflow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_outputs() {
        let report = PipelineBuilder::new()
            .emit(7)
            .emission_interval(ms(1))
            .window(3)
            .build()
            .unwrap()
            .start()
            .unwrap()
            .run_to_end()
            .await
            .unwrap();
        let sizes: Vec<usize> = report
            .outputs
            .iter()
            .filter_map(Output::as_window)
            .map(Window::len)
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(report.outputs[0].to_string(), "[1, 2, 3]");
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_values() {
        let report = PipelineBuilder::new()
            .emit(3)
            .emission_interval(ms(1))
            .build()
            .unwrap()
            .start_with(|seq| format!("item-{seq}"))
            .unwrap()
            .run_to_end()
            .await
            .unwrap();
        let rendered: Vec<String> = report.outputs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["item-1", "item-2", "item-3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_producer() {
        let running = PipelineBuilder::new()
            .emission_interval(ms(1))
            .build()
            .unwrap()
            .start()
            .unwrap();
        let handle = running.handle().clone();
        drop(running);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_joins_producer_refused_by_closed_buffer() {
        let running = PipelineBuilder::new()
            .emission_interval(ms(10))
            .build()
            .unwrap()
            .start()
            .unwrap();
        running.buffer.close();
        tokio::time::sleep(ms(15)).await;
        assert_eq!(running.shutdown().await.unwrap(), 0);
    }
}
