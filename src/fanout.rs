use crate::error::{PipelineError, Result};
use futures::stream::BoxStream;
use futures::{Future, Stream, StreamExt};
use std::sync::Arc;

/// Order in which fanned-out results are handed downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Re-serialised into source order. Required before a sampler or windower.
    #[default]
    Sequence,
    /// As each worker finishes
    Completion,
}

/// Process up to `workers` items at once, each on its own task.
///
/// Errors from `source` pass through in place of a result. A worker that panics
/// surfaces as [`PipelineError::TaskError`].
pub fn fan_out<S, I, O, F, Fut>(
    source: S,
    workers: usize,
    order: Order,
    f: F,
) -> BoxStream<'static, Result<O>>
where
    S: Stream<Item = Result<I>> + Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
{
    let workers = workers.max(1);
    let f = Arc::new(f);
    let tasks = source.map(move |next| {
        let f = Arc::clone(&f);
        async move {
            let input = next?;
            tokio::spawn(f(input))
                .await
                .map_err(|err| PipelineError::TaskError(err.to_string()))
        }
    });

    match order {
        Order::Sequence => tasks.buffered(workers).boxed(),
        Order::Completion => tasks.buffer_unordered(workers).boxed(),
    }
}
