use crate::buffer::Buffer;
use crate::error::Result;
use crate::handle::PipelineHandle;
use crate::item::Item;
use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use std::marker::PhantomData;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

fn sequence_value(seq: u64) -> u64 {
    seq
}

/// Emits an ordered, optionally infinite sequence of items at a fixed cadence.
///
/// Before every emission (the first included) the producer suspends for its
/// interval, then checks the run's cancellation flag. A cancelled run stops before
/// the next item is created.
pub struct Producer<T, F> {
    count: Option<u64>,
    interval: Duration,
    value_fn: F,
    _marker: PhantomData<fn() -> T>,
}

impl Producer<u64, fn(u64) -> u64> {
    /// A producer whose values are their own sequence indices (1, 2, 3, ...)
    pub fn counting(count: Option<u64>, interval: Duration) -> Self {
        Self::new(count, interval, sequence_value as fn(u64) -> u64)
    }
}

impl<T, F> Producer<T, F>
where
    F: FnMut(u64) -> T,
{
    /// `count` of `None` means the producer runs until cancelled
    pub fn new(count: Option<u64>, interval: Duration, value_fn: F) -> Self {
        Self {
            count,
            interval,
            value_fn,
            _marker: PhantomData,
        }
    }

    pub fn count(&self) -> Option<u64> {
        self.count
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The lazy emission sequence, ending when `count` is reached or `handle` is cancelled
    pub fn stream(self, handle: PipelineHandle) -> impl Stream<Item = Item<T>> {
        let Producer {
            count,
            interval,
            mut value_fn,
            ..
        } = self;

        stream! {
            let mut seq = 0u64;
            while count.map_or(true, |count| seq < count) {
                pause(interval, &handle).await;
                if handle.is_cancelled() {
                    debug!(seq, "producer observed cancellation");
                    break;
                }
                seq += 1;
                yield Item::new(seq, value_fn(seq));
            }
        }
    }

    /// Feed every emitted item into `buffer`, returning how many were emitted.
    ///
    /// Closes the buffer when the sequence ends. Stops at the first overflow and
    /// returns it; the buffer keeps the fault for its consumer.
    pub async fn run(self, buffer: Buffer<T>, handle: PipelineHandle) -> Result<u64> {
        info!(
            count = ?self.count,
            interval = ?self.interval,
            policy = %buffer.policy(),
            "producer started"
        );

        let items = self.stream(handle);
        pin_mut!(items);

        let mut emitted = 0u64;
        while let Some(item) = items.next().await {
            emitted += 1;
            if let Err(err) = buffer.offer(item) {
                debug!(emitted, error = %err, "producer stopped by buffer");
                return Err(err);
            }
        }

        buffer.close();
        info!(emitted, "producer finished");
        Ok(emitted)
    }

    /// Run the producer on its own task, decoupled from the consumer's timeline
    pub fn spawn(self, buffer: Buffer<T>, handle: PipelineHandle) -> JoinHandle<Result<u64>>
    where
        T: Send + 'static,
        F: Send + 'static,
    {
        tokio::spawn(self.run(buffer, handle))
    }
}

async fn pause(interval: Duration, handle: &PipelineHandle) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        _ = handle.cancelled() => {}
    }
}
