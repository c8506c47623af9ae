//! Flow-controlled stream pipelines that decouple a fast producer from a slow consumer.
//!
//! A producer emits an ordered, possibly infinite sequence of items on its own
//! timeline. Items land in a buffer whose overflow policy decides what happens when
//! the consumer falls behind. Between the buffer and the consumer a run may rate
//! limit releases, sample the latest item on a timer, or batch items into windows.
//!
//! # Features
//!
//! - Overflow policies: unbounded, drop-latest, drop-oldest, latest-only and error
//! - Cooperative cancellation, triggered by `take(n)`, an explicit cancel or a dropped consumer
//! - Rate limiting by spacing, fixed window or prefetch demand
//! - Timer-driven sampling and count-based windowing
//! - Bounded parallel fan-out with sequence or completion ordering
//! - Per-run metrics: offered, dropped, delivered, latency percentiles
//! - JSON configuration with camelCase keys
//!
//! # Example
//!
//! ```ignore
//! use stream_backpressure::{OverflowPolicy, PipelineBuilder};
//! use std::time::Duration;
//!
//! let report = PipelineBuilder::new()
//!     .overflow_policy(OverflowPolicy::DropLatest(10))
//!     .emit(100)
//!     .emission_interval(Duration::from_millis(5))
//!     .processing_delay(Duration::from_millis(150))
//!     .take(5)
//!     .build()?
//!     .start()?
//!     .run_to_end()
//!     .await?;
//!
//! for output in &report.outputs {
//!     println!("{output}");
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod demand;
pub mod error;
pub mod fanout;
pub mod handle;
pub mod item;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod producer;
pub mod rate_limit;
pub mod sampler;
pub mod scenario;
pub mod window;

// Re-exports for convenience
pub use buffer::{Buffer, BufferStats};
pub use config::{PipelineConfig, PolicyKind};
pub use consumer::{Consumer, Delay, FnProcess, Passthrough, Process};
pub use demand::Demand;
pub use error::{PipelineError, ProcessingFault, Result};
pub use fanout::{fan_out, Order};
pub use handle::{CancelOnDrop, PipelineHandle, Termination};
pub use item::Item;
pub use metrics::{MetricsSnapshot, PercentileTracker, PipelineMetrics};
pub use pipeline::{Output, Pipeline, PipelineBuilder, RunReport, RunningPipeline};
pub use policy::{Offer, OverflowPolicy};
pub use producer::Producer;
pub use rate_limit::{RateLimit, RateLimiter};
pub use sampler::Sampler;
pub use scenario::Scenario;
pub use window::{Window, Windower};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
