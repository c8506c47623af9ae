use crate::demand::Demand;
use crate::error::{PipelineError, ProcessingFault, Result};
use crate::handle::PipelineHandle;
use crate::metrics::PipelineMetrics;
use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{pin_mut, Stream, StreamExt};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

/// A processing step a consumer runs for every item it receives
#[async_trait]
pub trait Process<I>: Send + 'static {
    type Output: Send + 'static;

    /// Process one item. May suspend; the producer keeps emitting meanwhile.
    async fn process(&mut self, input: I) -> std::result::Result<Self::Output, ProcessingFault>;

    /// Get a human-readable name for this step
    fn name(&self) -> &str {
        "process"
    }
}

/// Hands every item through unchanged
#[derive(Debug, Default)]
pub struct Passthrough;

#[async_trait]
impl<I: Send + 'static> Process<I> for Passthrough {
    type Output = I;

    async fn process(&mut self, input: I) -> std::result::Result<I, ProcessingFault> {
        Ok(input)
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

/// Hands every item through after a fixed delay, modelling a slow consumer
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    duration: Duration,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl<I: Send + 'static> Process<I> for Delay {
    type Output = I;

    async fn process(&mut self, input: I) -> std::result::Result<I, ProcessingFault> {
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        Ok(input)
    }

    fn name(&self) -> &str {
        "delay"
    }
}

/// A synchronous processing step built from a closure
pub struct FnProcess<F, I> {
    name: String,
    f: F,
    _marker: PhantomData<fn(I)>,
}

impl<F, I, O> FnProcess<F, I>
where
    F: FnMut(I) -> std::result::Result<O, ProcessingFault> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, I, O> Process<I> for FnProcess<F, I>
where
    F: FnMut(I) -> std::result::Result<O, ProcessingFault> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    type Output = O;

    async fn process(&mut self, input: I) -> std::result::Result<O, ProcessingFault> {
        (self.f)(input)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// The terminal stage of a run.
///
/// Pulls from its source through a [`Demand`]: `take(n)` grants all `n` credits up
/// front, so up to `n` items move into the consumer's pending queue as they arrive
/// while earlier ones are still processing. Without a take count one credit is
/// granted per processed item. Anything beyond the granted demand waits upstream in
/// the buffer. A processing fault is replaced by the fallback value or, without one,
/// the item is skipped.
pub struct Consumer<P, I>
where
    P: Process<I>,
{
    processor: P,
    take: Option<u64>,
    fallback: Option<P::Output>,
    metrics: PipelineMetrics,
    _marker: PhantomData<fn(I)>,
}

impl<P, I> Consumer<P, I>
where
    P: Process<I>,
    I: Send + 'static,
{
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            take: None,
            fallback: None,
            metrics: PipelineMetrics::new(),
            _marker: PhantomData,
        }
    }

    /// Request exactly `n` items, cancelling upstream once the n-th arrives
    pub fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }

    /// Value substituted for the output of a faulted processing step
    pub fn with_fallback(mut self, fallback: P::Output) -> Self
    where
        P::Output: Clone,
    {
        self.fallback = Some(fallback);
        self
    }

    /// Record deliveries, faults and processing latency into `metrics`
    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Consume `source`, yielding processed outputs.
    ///
    /// Cancels `handle` when the take count is reached or when an error arrives
    /// (forwarded once after the items queued before it, then the stream ends).
    /// Must be polled from within a Tokio runtime.
    pub fn consume<S>(self, source: S, handle: PipelineHandle) -> BoxStream<'static, Result<P::Output>>
    where
        S: Stream<Item = Result<I>> + Send + 'static,
        P::Output: Clone,
    {
        let Consumer {
            mut processor,
            take,
            fallback,
            metrics,
            ..
        } = self;
        let demand = Demand::with_credit(take.unwrap_or(1));

        Box::pin(stream! {
            if take == Some(0) {
                handle.cancel();
                return;
            }
            let mut pending = intake(source, demand.clone(), take, handle.clone());

            while let Some(next) = pending.recv().await {
                let input = match next {
                    Ok(input) => input,
                    Err(err) => {
                        handle.cancel();
                        yield Err(err);
                        return;
                    }
                };

                let started = Instant::now();
                let outcome = processor.process(input).await;
                metrics.record_latency(started.elapsed());

                match outcome {
                    Ok(output) => {
                        metrics.record_delivered();
                        yield Ok(output);
                    }
                    Err(fault) => {
                        metrics.record_fault();
                        match fallback.clone() {
                            Some(value) => {
                                warn!(stage = processor.name(), error = %fault, "processing fault, using fallback");
                                metrics.record_delivered();
                                yield Ok(value);
                            }
                            None => {
                                warn!(stage = processor.name(), error = %fault, "processing fault, skipping item");
                            }
                        }
                    }
                }

                if take.is_none() {
                    demand.request(1);
                }
            }
        })
    }

    /// Consume `source` to the end, collecting outputs and the terminating error if any
    pub async fn collect<S>(
        self,
        source: S,
        handle: PipelineHandle,
    ) -> (Vec<P::Output>, Option<PipelineError>)
    where
        S: Stream<Item = Result<I>> + Send + 'static,
        P::Output: Clone,
    {
        let mut outputs = Vec::new();
        let mut error = None;
        let mut stream = self.consume(source, handle);
        while let Some(next) = stream.next().await {
            match next {
                Ok(output) => outputs.push(output),
                Err(err) => error = Some(err),
            }
        }
        (outputs, error)
    }
}

/// Pull from `source` while `demand` has credit, queueing arrivals for the consumer.
///
/// Stops after the take count is reached, after an error, at the end of `source`,
/// or once the consumer goes away.
fn intake<S, I>(
    source: S,
    demand: Demand,
    take: Option<u64>,
    handle: PipelineHandle,
) -> mpsc::UnboundedReceiver<Result<I>>
where
    S: Stream<Item = Result<I>> + Send + 'static,
    I: Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        pin_mut!(source);
        let mut received = 0u64;
        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = demand.acquire() => {}
            }
            let next = tokio::select! {
                _ = tx.closed() => break,
                next = source.next() => next,
            };
            let Some(next) = next else { break };

            let failed = next.is_err();
            if !failed {
                received += 1;
            }
            let satisfied = !failed && take == Some(received);
            if satisfied {
                info!(received, "take count satisfied, cancelling upstream");
                handle.cancel();
            }
            if tx.send(next).is_err() || failed || satisfied {
                break;
            }
        }
    });
    rx
}
