use crate::error::{PipelineError, Result};
use crate::item::Item;
use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Reduces a stream to at most one item per fixed interval: the latest one seen
/// since the previous tick.
///
/// Lossy on purpose. Requires ordered input so that "latest" means the highest
/// sequence index observed.
#[derive(Debug)]
pub struct Sampler<T> {
    interval: Duration,
    latest: Option<Item<T>>,
}

enum Event<T> {
    Tick,
    Source(Option<Result<Item<T>>>),
}

impl<T> Sampler<T> {
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(PipelineError::ConfigError(
                "sample interval must be non-zero".into(),
            ));
        }
        Ok(Self {
            interval,
            latest: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Record an arrival, returning the item it supersedes
    pub fn observe(&mut self, item: Item<T>) -> Option<Item<T>> {
        self.latest.replace(item)
    }

    /// Emit the latest item since the previous tick, if one arrived
    pub fn tick(&mut self) -> Option<Item<T>> {
        self.latest.take()
    }

    pub fn has_pending(&self) -> bool {
        self.latest.is_some()
    }

    /// Apply the sampler to `source` on a timer.
    ///
    /// The first tick fires one interval after the returned stream is first polled;
    /// ticks missed while downstream is busy are skipped. When `source` completes, a
    /// pending item is emitted before completion. An error is forwarded at once and
    /// ends the stream.
    pub fn sample<S>(self, source: S) -> impl Stream<Item = Result<Item<T>>>
    where
        S: Stream<Item = Result<Item<T>>>,
    {
        let mut sampler = self;
        stream! {
            pin_mut!(source);
            let mut ticker = interval_at(Instant::now() + sampler.interval, sampler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let event = tokio::select! {
                    biased;
                    _ = ticker.tick() => Event::Tick,
                    next = source.next() => Event::Source(next),
                };
                match event {
                    Event::Tick => {
                        if let Some(item) = sampler.tick() {
                            yield Ok(item);
                        }
                    }
                    Event::Source(Some(Ok(item))) => {
                        sampler.observe(item);
                    }
                    Event::Source(Some(Err(err))) => {
                        yield Err(err);
                        break;
                    }
                    Event::Source(None) => {
                        if let Some(item) = sampler.tick() {
                            yield Ok(item);
                        }
                        break;
                    }
                }
            }
        }
    }
}
