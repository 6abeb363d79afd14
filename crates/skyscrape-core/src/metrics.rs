//! Prometheus metrics helpers for skyscrape.
//!
//! # Usage
//!
//! ```rust,ignore
//! use skyscrape_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("posts_saved_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`firehose_`, `identity_`, `posts_`, `session_`)
//! - Suffix: unit or type (`_total`, `_bytes`, `_per_second`)
//!
//! When no recorder is installed every macro call is a no-op, so library code
//! records unconditionally.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server on `0.0.0.0:<port>/metrics`.
///
/// Binds before returning so an unavailable port is reported to the caller;
/// serving then continues on a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across skyscrape.
fn register_common_metrics() {
    // =========================================================================
    // Firehose transport
    // =========================================================================

    describe_counter!("firehose_frames_total", "Frames received from the firehose");
    describe_counter!("firehose_bytes_total", "Bytes received from the firehose");
    describe_counter!("firehose_commits_total", "Commit frames decoded");
    describe_counter!(
        "firehose_decode_errors_total",
        "Frames or commits skipped because they failed to decode (label: stage)"
    );
    describe_counter!(
        "firehose_reconnects_total",
        "Reconnect attempts after a transport failure"
    );
    describe_gauge!(
        "firehose_connected",
        "Whether the firehose subscription is open (1=yes, 0=no)"
    );

    // =========================================================================
    // Identity resolution
    // =========================================================================

    describe_counter!("identity_cache_hits_total", "Handle cache hits");
    describe_counter!("identity_cache_misses_total", "Handle cache misses");
    describe_counter!(
        "identity_resolution_failures_total",
        "DID resolutions that fell back to the raw DID"
    );

    // =========================================================================
    // Output
    // =========================================================================

    describe_counter!("posts_saved_total", "Posts appended to the output file");
    describe_gauge!("posts_per_second", "Average post collection rate");
    describe_gauge!(
        "session_running",
        "Whether a collection session is running (1=yes, 0=no)"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Record bytes with a type label.
pub fn record_bytes(metric_name: &'static str, byte_type: &'static str, bytes: u64) {
    metrics::counter!(metric_name, "type" => byte_type).increment(bytes);
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}
