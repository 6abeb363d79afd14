//! Session controller: the subscribe/process/reconnect loop.
//!
//! # Lifecycle
//!
//! ```text
//! Idle → Connecting → Streaming → Stopping → Terminated
//!            ↑            │
//!            └─ Retrying ←┘   (transport failure, backoff base × 2^n)
//! ```
//!
//! A session stops when the configured duration elapses, when the post
//! target is reached, when the running flag is cleared, when the output
//! file cannot be written, or when reconnecting has failed `max_retries`
//! times in a row. Every path ends in a [`SessionSummary`].

use super::summary::SessionSummary;
use crate::identity::IdentityBackend;
use crate::pipeline::{JsonlSink, PostExtractor};
use crate::source::{Subscription, Transport};
use crate::{Error, Result};

use chrono::{DateTime, Utc};
use metrics::counter;
use skyscrape_core::metrics::{increment, record_bytes, set_gauge};
use skyscrape_core::{Frame, decode_frame};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Log progress every N frames.
const PROGRESS_INTERVAL: u64 = 10_000;

/// Characters of post text shown in verbose logs.
const PREVIEW_CHARS: usize = 50;

/// Automatic stop condition. Cancellation through the running flag is
/// always active on top of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopCondition {
    /// Stop once this much time has passed since the session started.
    Duration(Duration),
    /// Stop once this many posts have been saved.
    PostCount(u64),
    /// Run until cancelled.
    #[default]
    Manual,
}

/// Configuration for a collection session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub stop: StopCondition,

    /// Consecutive reconnect attempts before giving up.
    /// Default: 3
    pub max_retries: u32,

    /// Delay before the first reconnect; doubled for each further attempt.
    /// Default: 5 s
    pub initial_backoff: Duration,

    /// Longest wait for a frame before re-checking the stop conditions.
    /// Default: 1 s
    pub poll_interval: Duration,

    /// Log every saved post.
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop: StopCondition::default(),
            max_retries: 3,
            initial_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            verbose: false,
        }
    }
}

impl SessionConfig {
    /// Delay before reconnect attempt `attempt` (zero-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Streaming,
    Retrying,
    Stopping,
    Terminated,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    PostLimitReached,
    Cancelled,
    /// Reconnecting failed too many times in a row.
    RetriesExhausted { attempts: u32, last_error: String },
    /// The transport failed in a way reconnecting cannot fix.
    TransportFatal(String),
    /// The output file could not be written.
    SinkFailed(String),
}

impl StopReason {
    /// Whether the session ended because of an unrecoverable error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StopReason::RetriesExhausted { .. }
                | StopReason::TransportFatal(_)
                | StopReason::SinkFailed(_)
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::DurationElapsed => f.write_str("duration elapsed"),
            StopReason::PostLimitReached => f.write_str("post limit reached"),
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} retries: {last_error}"),
            StopReason::TransportFatal(e) => write!(f, "transport failed: {e}"),
            StopReason::SinkFailed(e) => write!(f, "output failed: {e}"),
        }
    }
}

/// Mutable session counters, owned by the controller.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub post_count: u64,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
    pub output_path: PathBuf,
    pub frames_received: u64,
    pub events_skipped: u64,
    pub reconnects: u32,
    pub phase: SessionPhase,
}

impl SessionState {
    fn new(output_path: PathBuf) -> Self {
        Self {
            post_count: 0,
            start_time: Instant::now(),
            started_at: Utc::now(),
            output_path,
            frames_received: 0,
            events_skipped: 0,
            reconnects: 0,
            phase: SessionPhase::Idle,
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::debug!("Session {:?} → {:?}", self.phase, phase);
            self.phase = phase;
        }
    }
}

/// How a subscription ended.
enum StreamEnd {
    Stop(StopReason),
    Lost(Error),
}

/// What to do after one frame.
enum FrameOutcome {
    Continue,
    Stop(StopReason),
    Lost(Error),
}

/// Drives a [`Transport`] through the post pipeline until a stop condition.
pub struct Session<T, B> {
    transport: T,
    extractor: PostExtractor<B>,
    sink: JsonlSink,
    config: SessionConfig,
    running: Arc<AtomicBool>,
    state: SessionState,
}

impl<T, B> Session<T, B>
where
    T: Transport,
    B: IdentityBackend,
{
    pub fn new(
        transport: T,
        extractor: PostExtractor<B>,
        sink: JsonlSink,
        config: SessionConfig,
    ) -> Self {
        let state = SessionState::new(sink.path().to_path_buf());
        Self {
            transport,
            extractor,
            sink,
            config,
            running: Arc::new(AtomicBool::new(true)),
            state,
        }
    }

    /// Flag that keeps the session running; store `false` to cancel.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run until a stop condition and return the summary.
    pub async fn run(mut self) -> SessionSummary {
        self.state.start_time = Instant::now();
        self.state.started_at = Utc::now();
        let deadline = match self.config.stop {
            StopCondition::Duration(d) => Some(self.state.start_time + d),
            _ => None,
        };

        set_gauge("session_running", 1.0);
        tracing::info!(
            "Session started: source={}, stop={:?}, output={}",
            self.transport.name(),
            self.config.stop,
            self.state.output_path.display()
        );

        let reason = self.run_loop(deadline).await;

        self.state.enter(SessionPhase::Stopping);
        set_gauge("session_running", 0.0);
        let elapsed = self.state.start_time.elapsed();
        let summary = SessionSummary::from_state(&self.state, elapsed, reason);
        set_gauge("posts_per_second", summary.rate());
        self.state.enter(SessionPhase::Terminated);
        summary
    }

    async fn run_loop(&mut self, deadline: Option<Instant>) -> StopReason {
        let mut failures: u32 = 0;

        loop {
            if let Some(reason) = self.check_stop(deadline) {
                return reason;
            }

            self.state.enter(SessionPhase::Connecting);
            let error = match self.transport.subscribe().await {
                Ok(mut subscription) => {
                    set_gauge("firehose_connected", 1.0);
                    self.state.enter(SessionPhase::Streaming);
                    let end = self.stream(&mut subscription, deadline, &mut failures).await;
                    subscription.close().await;
                    set_gauge("firehose_connected", 0.0);
                    match end {
                        StreamEnd::Stop(reason) => return reason,
                        StreamEnd::Lost(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::error!("Unrecoverable transport error: {}", error);
                return StopReason::TransportFatal(error.to_string());
            }

            if failures >= self.config.max_retries {
                tracing::error!(
                    "Connection failed after {} retries: {}",
                    failures,
                    error
                );
                return StopReason::RetriesExhausted {
                    attempts: failures,
                    last_error: error.to_string(),
                };
            }

            let delay = self.config.backoff_delay(failures);
            failures += 1;
            self.state.reconnects += 1;
            increment("firehose_reconnects_total", 1);
            self.state.enter(SessionPhase::Retrying);
            tracing::warn!(
                "Connection lost ({}), retrying in {:?} (attempt {}/{})",
                error,
                delay,
                failures,
                self.config.max_retries
            );

            if let Some(reason) = self.backoff(delay, deadline).await {
                return reason;
            }
        }
    }

    /// Read frames until a stop condition or a transport failure.
    async fn stream(
        &mut self,
        subscription: &mut T::Subscription,
        deadline: Option<Instant>,
        failures: &mut u32,
    ) -> StreamEnd {
        loop {
            if let Some(reason) = self.check_stop(deadline) {
                return StreamEnd::Stop(reason);
            }

            let wait = match deadline {
                Some(deadline) => self
                    .config
                    .poll_interval
                    .min(deadline.saturating_duration_since(Instant::now())),
                None => self.config.poll_interval,
            };

            let frame = match tokio::time::timeout(wait, subscription.next_frame()).await {
                Err(_) => continue,
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    return StreamEnd::Lost(Error::Transport(
                        "relay closed the stream".to_string(),
                    ));
                }
                Ok(Err(e)) => return StreamEnd::Lost(e),
            };

            match self.process_frame(&frame).await {
                FrameOutcome::Continue => *failures = 0,
                FrameOutcome::Stop(reason) => return StreamEnd::Stop(reason),
                FrameOutcome::Lost(e) => return StreamEnd::Lost(e),
            }
        }
    }

    /// Decode one frame and push its posts through the sink.
    async fn process_frame(&mut self, bytes: &[u8]) -> FrameOutcome {
        self.state.frames_received += 1;
        increment("firehose_frames_total", 1);
        record_bytes("firehose_bytes_total", "frame", bytes.len() as u64);

        if self.state.frames_received.is_multiple_of(PROGRESS_INTERVAL) {
            let elapsed = self.state.start_time.elapsed().as_secs_f64();
            let rate = if elapsed > 0.0 {
                self.state.post_count as f64 / elapsed
            } else {
                0.0
            };
            set_gauge("posts_per_second", rate);
            tracing::info!(
                "Progress: {} frames, {} posts ({:.1}/s), {} skipped",
                self.state.frames_received,
                self.state.post_count,
                rate,
                self.state.events_skipped
            );
        }

        let event = match decode_frame(bytes) {
            Ok(Frame::Commit(event)) => event,
            Ok(Frame::Other { kind, seq }) => {
                tracing::trace!("Ignoring {} frame (seq {:?})", kind, seq);
                return FrameOutcome::Continue;
            }
            Ok(Frame::Error { error, message }) => {
                return FrameOutcome::Lost(Error::Transport(match message {
                    Some(message) => format!("relay error {error}: {message}"),
                    None => format!("relay error {error}"),
                }));
            }
            Err(e) => {
                self.state.events_skipped += 1;
                counter!("firehose_decode_errors_total", "stage" => "frame").increment(1);
                tracing::warn!("Skipping undecodable frame: {}", e);
                return FrameOutcome::Continue;
            }
        };

        increment("firehose_commits_total", 1);
        if event.too_big {
            tracing::debug!(repo = %event.repo, seq = event.seq, "commit flagged tooBig");
        }

        let posts = match self.extractor.extract_posts(&event).await {
            Ok(posts) => posts,
            Err(e) => {
                self.state.events_skipped += 1;
                counter!("firehose_decode_errors_total", "stage" => "commit").increment(1);
                tracing::warn!(
                    repo = %event.repo,
                    seq = event.seq,
                    "Skipping commit: {}",
                    e
                );
                return FrameOutcome::Continue;
            }
        };

        for post in &posts {
            match self.save(post) {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(
                        "Failed to write {}: {}",
                        self.state.output_path.display(),
                        e
                    );
                    return FrameOutcome::Stop(StopReason::SinkFailed(e.to_string()));
                }
            }

            if self.post_limit_reached() {
                tracing::info!("Reached post limit of {}", self.state.post_count);
                return FrameOutcome::Stop(StopReason::PostLimitReached);
            }
        }

        FrameOutcome::Continue
    }

    fn save(&mut self, post: &skyscrape_core::PostRecord) -> Result<()> {
        self.state.post_count = self.sink.save(post)?;

        if self.config.verbose {
            let preview: String = post.text.chars().take(PREVIEW_CHARS).collect();
            tracing::info!("[{}] @{}: {}", self.state.post_count, post.author, preview);
        }
        Ok(())
    }

    fn post_limit_reached(&self) -> bool {
        matches!(self.config.stop, StopCondition::PostCount(limit) if self.state.post_count >= limit)
    }

    fn check_stop(&self, deadline: Option<Instant>) -> Option<StopReason> {
        if !self.running.load(Ordering::SeqCst) {
            return Some(StopReason::Cancelled);
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(StopReason::DurationElapsed);
        }
        if self.post_limit_reached() {
            return Some(StopReason::PostLimitReached);
        }
        None
    }

    /// Sleep before a reconnect, waking early for cancellation or the deadline.
    async fn backoff(&self, delay: Duration, deadline: Option<Instant>) -> Option<StopReason> {
        let until = Instant::now() + delay;
        loop {
            if let Some(reason) = self.check_stop(deadline) {
                return Some(reason);
            }
            let now = Instant::now();
            if now >= until {
                return None;
            }

            let mut wake = until.min(now + self.config.poll_interval);
            if let Some(deadline) = deadline {
                wake = wake.min(deadline);
            }
            tokio::time::sleep_until(wake).await;
        }
    }
}
