//! Command-line interface for partition-sink
//!
//! # Usage Examples
//!
//! ```bash
//! # Run with ./config.json
//! partition-sink
//!
//! # Another config file, reading partition 3 from the oldest offset with 4 workers
//! partition-sink --config /etc/partition-sink/events.json \
//!   --partition 3 --offset -2 --workers 4
//!
//! # Override the brokers and the output file
//! PARTITION_SINK_BROKERS=kafka-1:9092,kafka-2:9092 \
//!   partition-sink --output /var/lib/events/events.log
//! ```
//!
//! The first SIGINT/SIGTERM stops the consumer gracefully; a second one
//! cancels it.

use anyhow::Context;
use clap::Parser;
use partition_sink::config::{Config, Overrides, DEFAULT_CONFIG_PATH};
use partition_sink::consumer::Consumer;
use partition_sink::logging;
use partition_sink::shutdown::{listen_for_signals, Shutdown};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "partition-sink")]
#[command(about = "Append the records of one Kafka partition to a file")]
#[command(long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(long, env = "PARTITION_SINK_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        // Give the log writer a moment before the process goes away
        tokio::time::sleep(Duration::from_secs(1)).await;
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_file(&cli.config)?;
    config.apply(&cli.overrides);
    config.validate()?;

    let target = logging::init(&config.log_path)?;
    debug!("Logging to {target:?}");
    info!("Configuration loaded from {}", cli.config.display());

    let shutdown = Shutdown::new();
    let cancel = CancellationToken::new();
    let signals = listen_for_signals(shutdown.clone(), cancel.clone());
    let shutdown_timeout = config.shutdown_timeout()?;

    let mut consumer = Consumer::new(&config, shutdown.clone())?;
    consumer.startup();
    consumer
        .load_puller()
        .await
        .context("Failed to start Kafka consumer")?;
    consumer
        .load_pusher()
        .await
        .with_context(|| format!("Failed to open {}", config.output_path))?;

    info!("Starting consumer {consumer}");
    let result = consumer.run(cancel).await;

    shutdown
        .wait_for_acknowledgements(shutdown_timeout)
        .await;
    signals.abort();

    result.context("Consumer stopped")?;
    info!("Exiting");
    Ok(())
}
