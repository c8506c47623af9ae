use crate::error::{PipelineError, Result};
use crate::fanout::{fan_out, Order};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::policy::OverflowPolicy;
use crate::rate_limit::RateLimit;
use async_stream::stream;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const PARALLEL_USERS: u64 = 5;
const PARALLEL_WORKERS: usize = 2;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// A named demonstration run, rendered as one text line per output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    Buffer,
    Drop,
    Latest,
    Error,
    SlowConsumer,
    FastProducer,
    LimitRate,
    Sample,
    Window,
    Comparison,
    OverflowStrategy,
    Parallel,
}

/// One pipeline run inside a scenario
struct Section {
    header: Option<&'static str>,
    label: &'static str,
    suffix: &'static str,
    builder: PipelineBuilder,
}

impl Section {
    fn new(label: &'static str, builder: PipelineBuilder) -> Self {
        Self {
            header: None,
            label,
            suffix: "",
            builder,
        }
    }

    fn header(mut self, header: &'static str) -> Self {
        self.header = Some(header);
        self
    }

    fn suffix(mut self, suffix: &'static str) -> Self {
        self.suffix = suffix;
        self
    }
}

impl Scenario {
    pub const ALL: [Scenario; 12] = [
        Scenario::Buffer,
        Scenario::Drop,
        Scenario::Latest,
        Scenario::Error,
        Scenario::SlowConsumer,
        Scenario::FastProducer,
        Scenario::LimitRate,
        Scenario::Sample,
        Scenario::Window,
        Scenario::Comparison,
        Scenario::OverflowStrategy,
        Scenario::Parallel,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Buffer => "buffer",
            Scenario::Drop => "drop",
            Scenario::Latest => "latest",
            Scenario::Error => "error",
            Scenario::SlowConsumer => "slow-consumer",
            Scenario::FastProducer => "fast-producer",
            Scenario::LimitRate => "limit-rate",
            Scenario::Sample => "sample",
            Scenario::Window => "window",
            Scenario::Comparison => "comparison",
            Scenario::OverflowStrategy => "overflow-strategy",
            Scenario::Parallel => "parallel",
        }
    }

    fn sections(&self) -> Vec<Section> {
        let source = |count: u64, interval: u64| {
            PipelineBuilder::new()
                .emit(count)
                .emission_interval(ms(interval))
        };
        let endless = |interval: u64| {
            PipelineBuilder::new()
                .emit_forever()
                .emission_interval(ms(interval))
        };
        let contender = |policy: OverflowPolicy| {
            source(100, 5)
                .overflow_policy(policy)
                .take(10)
                .processing_delay(ms(100))
        };
        let strategy = |policy: OverflowPolicy| {
            source(100, 5)
                .overflow_policy(policy)
                .take(5)
                .processing_delay(ms(150))
        };

        match self {
            Scenario::Buffer => vec![Section::new(
                "Buffered item",
                source(100, 10)
                    .overflow_policy(OverflowPolicy::DropLatest(20))
                    .take(30),
            )],
            Scenario::Drop => vec![Section::new(
                "Item",
                source(100, 10)
                    .overflow_policy(OverflowPolicy::DropLatest(1))
                    .take(30),
            )
            .suffix(" (some may be dropped)")],
            Scenario::Latest => vec![Section::new(
                "Latest item",
                source(100, 10)
                    .overflow_policy(OverflowPolicy::LatestOnly)
                    .take(30),
            )],
            Scenario::Error => vec![Section::new(
                "Item",
                source(1000, 1)
                    .overflow_policy(OverflowPolicy::ErrorOnOverflow(16))
                    .processing_delay(ms(5)),
            )],
            Scenario::SlowConsumer => vec![Section::new(
                "Slow processed",
                endless(10)
                    .overflow_policy(OverflowPolicy::ErrorOnOverflow(50))
                    .processing_delay(ms(100))
                    .take(20),
            )],
            Scenario::FastProducer => vec![Section::new(
                "Processed with delay",
                source(50, 5)
                    .overflow_policy(OverflowPolicy::DropOldest(10))
                    .processing_delay(ms(100)),
            )],
            Scenario::LimitRate => vec![Section::new(
                "Rate-limited item",
                source(100, 10)
                    .rate_limit(RateLimit::Prefetch { prefetch: 10 })
                    .take(30),
            )],
            Scenario::Sample => vec![Section::new(
                "Sampled item",
                endless(10).sample(ms(200)).take(20),
            )],
            Scenario::Window => vec![Section::new("Window batch", source(50, 20).window(10))],
            Scenario::Comparison => vec![
                Section::new("DROP", contender(OverflowPolicy::DropLatest(1)))
                    .header("=== Testing DROP strategy ==="),
                Section::new("BUFFER", contender(OverflowPolicy::ErrorOnOverflow(20)))
                    .header("=== Testing BUFFER strategy ==="),
                Section::new("LATEST", contender(OverflowPolicy::LatestOnly))
                    .header("=== Testing LATEST strategy ==="),
            ],
            Scenario::OverflowStrategy => vec![
                Section::new("DROP_LATEST", strategy(OverflowPolicy::DropLatest(10)))
                    .header("=== DROP_LATEST: Keeps oldest items ==="),
                Section::new("DROP_OLDEST", strategy(OverflowPolicy::DropOldest(10)))
                    .header("=== DROP_OLDEST: Keeps newest items ==="),
            ],
            Scenario::Parallel => Vec::new(),
        }
    }

    /// Run the scenario, yielding one line per output.
    ///
    /// Sections run one after another. An overflow ends its section with an error
    /// line and the next section still runs; only a failure to start a run is
    /// returned as an error.
    pub fn lines(self) -> BoxStream<'static, Result<String>> {
        if self == Scenario::Parallel {
            return parallel_lines();
        }

        let sections = self.sections();
        Box::pin(stream! {
            for section in sections {
                if let Some(header) = section.header {
                    yield Ok(header.to_string());
                }
                let mut running = match section.builder.build().and_then(Pipeline::start) {
                    Ok(running) => running,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                while let Some(next) = running.next().await {
                    match next {
                        Ok(output) => yield Ok(format!("{}: {}{}", section.label, output, section.suffix)),
                        Err(err) => yield Ok(format!("Error: Backpressure limit exceeded - {err}")),
                    }
                }
                if let Err(err) = running.shutdown().await {
                    yield Err(err);
                    return;
                }
            }
        })
    }
}

/// Slow per-user work spread over a fixed pool, reported as each finishes
fn parallel_lines() -> BoxStream<'static, Result<String>> {
    let users = stream::iter((1..=PARALLEL_USERS).map(Ok));
    fan_out(users, PARALLEL_WORKERS, Order::Completion, |user: u64| async move {
        tokio::time::sleep(ms(500)).await;
        format!("Processed: user-{user}")
    })
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| PipelineError::ConfigError(format!("unknown scenario: {s}")))
    }
}
