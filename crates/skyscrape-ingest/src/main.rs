//! skyscrape firehose collector.
//!
//! Connects to the Bluesky relay firehose, keeps every newly created post and
//! appends it to a JSON Lines file until a stop condition is met.
//!
//! # Usage
//!
//! ```bash
//! # Collect for five minutes
//! skyscrape-ingest --duration 300
//!
//! # Collect 1000 posts into a named file, logging each one
//! skyscrape-ingest --count 1000 --output posts.jsonl --verbose
//!
//! # Use another relay and expose Prometheus metrics
//! skyscrape-ingest --relay-url wss://relay.example.com --metrics-port 9090
//! ```
//!
//! # Graceful Shutdown
//!
//! Ctrl+C stops the session at the next poll: the subscription is closed,
//! the summary is printed and the process exits 0. A session that stops
//! because the output file failed or the relay stayed unreachable exits 1.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use skyscrape_core::metrics::{init_metrics, start_metrics_server};
use skyscrape_ingest::{
    ExtractMode, FirehoseClient, FirehoseConfig, HandleResolver, HttpResolver,
    HttpResolverConfig, JsonlSink, PostExtractor, Session, SessionConfig, StopCondition,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Bluesky firehose post collector.
#[derive(Parser, Debug)]
#[command(name = "skyscrape-ingest")]
#[command(about = "Collect new Bluesky posts from the firehose into a JSONL file")]
#[command(version)]
struct Args {
    /// Stop after this many seconds
    #[arg(long, env = "SKYSCRAPE_DURATION", conflicts_with = "count")]
    duration: Option<u64>,

    /// Stop after saving this many posts
    #[arg(long, env = "SKYSCRAPE_COUNT")]
    count: Option<u64>,

    /// Output file (default: bluesky_posts_<YYYYmmdd_HHMMSS>.jsonl)
    #[arg(long, short, env = "SKYSCRAPE_OUTPUT")]
    output: Option<PathBuf>,

    /// Log every saved post
    #[arg(long, short, env = "SKYSCRAPE_VERBOSE")]
    verbose: bool,

    /// Relay WebSocket URL
    #[arg(long, env = "SKYSCRAPE_RELAY_URL", default_value = "wss://bsky.network")]
    relay_url: String,

    /// PLC directory URL for did:plc resolution
    #[arg(long, env = "SKYSCRAPE_PLC_URL", default_value = "https://plc.directory")]
    plc_url: String,

    /// Reconnect attempts before giving up
    #[arg(long, env = "SKYSCRAPE_MAX_RETRIES", default_value = "3")]
    max_retries: u32,

    /// Initial reconnect delay in seconds (doubles per attempt)
    #[arg(long, env = "SKYSCRAPE_RETRY_DELAY", default_value = "5")]
    retry_delay: u64,

    /// Timeout for a single DID document request, in seconds
    #[arg(long, env = "SKYSCRAPE_RESOLVE_TIMEOUT", default_value = "3")]
    resolve_timeout: u64,

    /// Only emit posts referenced by a create operation's CID
    #[arg(long, env = "SKYSCRAPE_PER_OPERATION")]
    per_operation: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "SKYSCRAPE_METRICS_PORT", default_value = "0")]
    metrics_port: u16,
}

impl Args {
    fn stop_condition(&self) -> StopCondition {
        match (self.duration, self.count) {
            (Some(secs), _) => StopCondition::Duration(Duration::from_secs(secs)),
            (None, Some(count)) => StopCondition::PostCount(count),
            (None, None) => StopCondition::Manual,
        }
    }

    fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(
                chrono::Local::now()
                    .format("bluesky_posts_%Y%m%d_%H%M%S.jsonl")
                    .to_string(),
            )
        })
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();

    let mut filter = EnvFilter::from_default_env().add_directive("info".parse()?);
    if args.verbose {
        filter = filter.add_directive("skyscrape_ingest=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("skyscrape collector starting...");

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .with_context(|| format!("Failed to start metrics server on port {}", args.metrics_port))?;
    }

    let client = FirehoseClient::new(FirehoseConfig {
        relay_url: args.relay_url.clone(),
        ..Default::default()
    })
    .context("Invalid relay URL")?;

    let backend = HttpResolver::new(HttpResolverConfig {
        plc_url: args.plc_url.clone(),
        timeout: Duration::from_secs(args.resolve_timeout),
    })
    .context("Failed to create identity resolver")?;

    let mode = if args.per_operation {
        ExtractMode::PerOperation
    } else {
        ExtractMode::BundleWide
    };
    let extractor = PostExtractor::new(HandleResolver::new(backend), mode);

    let output = args.output_path();
    let sink = JsonlSink::new(&output);

    let config = SessionConfig {
        stop: args.stop_condition(),
        max_retries: args.max_retries,
        initial_backoff: Duration::from_secs(args.retry_delay),
        verbose: args.verbose,
        ..Default::default()
    };

    tracing::info!("Configuration:");
    tracing::info!("  Relay: {}", client.endpoint());
    tracing::info!("  PLC directory: {}", args.plc_url);
    tracing::info!("  Output: {}", output.display());
    tracing::info!("  Stop: {:?}", config.stop);
    tracing::info!("  Extract mode: {:?}", mode);
    tracing::info!(
        "  Retries: {} (initial delay {}s)",
        config.max_retries,
        args.retry_delay
    );

    let session = Session::new(client, extractor, sink, config);

    // Set up graceful shutdown
    let running = session.running();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let summary = session.run().await;
    summary.report();

    Ok(if summary.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
