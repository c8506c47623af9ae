//! Prints the demonstration scenarios, one line per output.
//!
//! ```text
//! cargo run --example scenarios -- comparison
//! RUST_LOG=stream_backpressure=debug cargo run --example scenarios -- drop
//! ```
//!
//! Without an argument every scenario runs in turn.

use futures::StreamExt;
use stream_backpressure::{Result, Scenario};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let scenarios = match std::env::args().nth(1) {
        Some(name) => vec![name.parse::<Scenario>()?],
        None => Scenario::ALL.to_vec(),
    };

    for scenario in scenarios {
        println!("# {scenario}");
        let mut lines = scenario.lines();
        while let Some(line) = lines.next().await {
            println!("{}", line?);
        }
        println!();
    }
    Ok(())
}
