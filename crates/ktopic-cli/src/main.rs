//! ktopic CLI - pipe lines into a topic
//!
//! `ktopic produce` reads stdin line by line and hands each line to a
//! non-blocking topic writer. Lines the writer cannot queue are dropped and
//! counted, never waited for.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use ktopic_client::{
    Acks, BrokerConnector, BrokerProducer, CompressionCodec, ConnectOptions, DeliveryError, Error,
    TcpConnector, TcpProducer, Writer, WriterConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ktopic")]
#[command(about = "ktopic - asynchronous, non-blocking topic producer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Broker flags; unset flags keep the configured or default value
#[derive(Args)]
struct BrokerArgs {
    /// Broker addresses (comma separated) [default: localhost:9092]
    #[arg(short, long, env = "KTOPIC_BROKERS", value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Dial timeout in milliseconds [default: 10000]
    #[arg(long)]
    connect_timeout_ms: Option<u64>,
}

#[derive(Args)]
struct ProduceArgs {
    /// Topic name
    topic: String,

    #[command(flatten)]
    broker: BrokerArgs,

    /// Writer configuration file (JSON); flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Delivery workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Queue slack on top of one slot per worker
    #[arg(short, long)]
    queue_size: Option<usize>,

    /// Compression codec: none, snappy, lz4
    #[arg(long)]
    compression: Option<CompressionCodec>,

    /// Acknowledgment level: none, leader, all
    #[arg(long)]
    acks: Option<Acks>,

    /// Per-send timeout in milliseconds
    #[arg(long)]
    send_timeout_ms: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write stdin lines to a topic, one record per line
    Produce(ProduceArgs),

    /// Print the partition count of a topic
    Partitions {
        /// Topic name
        topic: String,

        #[command(flatten)]
        broker: BrokerArgs,
    },

    /// Ping a broker to check connectivity
    Ping {
        #[command(flatten)]
        broker: BrokerArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Produce(args) => {
            let base = match &args.config {
                Some(path) => {
                    let raw = std::fs::read_to_string(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    serde_json::from_str::<WriterConfig>(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?
                }
                None => WriterConfig::default(),
            };

            if let Some(addr) = args.metrics_addr {
                ktopic_core::metrics::init_metrics(addr)
                    .map_err(|e| anyhow::anyhow!("metrics exporter: {}", e))?;
            }

            produce(args.apply(base)).await?;
        }

        Commands::Partitions { topic, broker } => {
            let mut producer = TcpConnector.connect(&broker.options()).await?;
            let partitions = producer.partition_count(&topic).await?;
            producer.close().await?;
            println!("{}: {} partition(s)", topic, partitions);
        }

        Commands::Ping { broker } => {
            let mut producer = TcpProducer::connect(broker.options()).await?;
            let start = std::time::Instant::now();
            producer.ping().await?;
            println!("PONG from {} in {:?}", producer.broker(), start.elapsed());
            producer.close().await?;
        }
    }

    Ok(())
}

impl BrokerArgs {
    fn apply(&self, options: &mut ConnectOptions) {
        if let Some(brokers) = &self.brokers {
            options.brokers = brokers.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            options.connection_timeout = Duration::from_millis(ms);
        }
    }

    fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::default();
        self.apply(&mut options);
        options
    }
}

impl ProduceArgs {
    /// Layer the command line flags over `config`
    fn apply(&self, mut config: WriterConfig) -> WriterConfig {
        config.topic = self.topic.clone();
        self.broker.apply(&mut config.connection);
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(queue_size) = self.queue_size {
            config.queue_size = queue_size;
        }
        if let Some(codec) = self.compression {
            config.connection.compression = codec;
        }
        if let Some(acks) = self.acks {
            config.connection.acks = acks;
        }
        if let Some(ms) = self.send_timeout_ms {
            config.send_timeout = Some(Duration::from_millis(ms));
        }
        config
    }
}

async fn produce(config: WriterConfig) -> anyhow::Result<()> {
    let failures = Arc::new(AtomicU64::new(0));
    let failures_seen = Arc::clone(&failures);

    let writer = Writer::connect_with_handler(config, &TcpConnector, move |err: &DeliveryError| {
        failures_seen.fetch_add(1, Ordering::Relaxed);
        warn!("{}", err);
    })
    .await
    .context("starting topic writer")?;

    info!(topic = writer.topic(), capacity = writer.capacity(), "Reading records from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut dropped = 0u64;
    while let Some(line) = lines.next_line().await? {
        match writer.write(line.as_bytes()) {
            Ok(_) => {}
            Err(Error::Dropped) => dropped += 1,
            Err(e) => return Err(e.into()),
        }
    }

    let close_result = writer.close().await;
    let stats = writer.stats();
    println!(
        "✓ {} accepted, {} delivered, {} failed, {} dropped ({:.1}% buffer reuse)",
        stats.accepted,
        stats.delivered,
        stats.failed,
        dropped,
        writer.pool().stats().hit_rate() * 100.0
    );
    close_result?;

    if failures.load(Ordering::Relaxed) > 0 {
        anyhow::bail!(
            "{} record(s) could not be delivered",
            failures.load(Ordering::Relaxed)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn produce_args(args: &[&str]) -> ProduceArgs {
        let mut argv = vec!["ktopic", "produce"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Produce(args) => args,
            _ => panic!("expected the produce command"),
        }
    }

    fn file_config() -> WriterConfig {
        serde_json::from_str(
            r#"{
                "topic": "from-file",
                "workers": 8,
                "queue_size": 50,
                "brokers": ["broker-a:9092", "broker-b:9092"],
                "connection_timeout": "3s",
                "compression": "lz4"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_unset_flags_keep_file_values() {
        std::env::remove_var("KTOPIC_BROKERS");
        let config = produce_args(&["events"]).apply(file_config());

        assert_eq!(config.topic, "events");
        assert_eq!(config.workers, 8);
        assert_eq!(config.queue_size, 50);
        assert_eq!(
            config.connection.brokers,
            vec!["broker-a:9092".to_string(), "broker-b:9092".to_string()]
        );
        assert_eq!(config.connection.connection_timeout, Duration::from_secs(3));
        assert_eq!(config.connection.compression, CompressionCodec::Lz4);
        assert_eq!(config.send_timeout, None);
    }

    #[test]
    fn test_flags_override_file_values() {
        let config = produce_args(&[
            "events",
            "--brokers",
            "10.0.0.1:9092,10.0.0.2:9092",
            "--connect-timeout-ms",
            "250",
            "--workers",
            "2",
            "--queue-size",
            "7",
            "--compression",
            "none",
            "--acks",
            "all",
            "--send-timeout-ms",
            "1500",
        ])
        .apply(file_config());

        assert_eq!(
            config.connection.brokers,
            vec!["10.0.0.1:9092".to_string(), "10.0.0.2:9092".to_string()]
        );
        assert_eq!(config.connection.connection_timeout, Duration::from_millis(250));
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_size, 7);
        assert_eq!(config.connection.compression, CompressionCodec::None);
        assert_eq!(config.connection.acks, Acks::All);
        assert_eq!(config.send_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.capacity(), 9);
    }

    #[test]
    fn test_broker_options_default_without_flags() {
        std::env::remove_var("KTOPIC_BROKERS");
        let cli = Cli::try_parse_from(["ktopic", "ping"]).unwrap();
        let Commands::Ping { broker } = cli.command else {
            panic!("expected the ping command");
        };
        assert_eq!(broker.options(), ConnectOptions::default());
    }
}
