//! End-of-session report.

use super::controller::{SessionState, StopReason};

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub post_count: u64,
    pub frames_received: u64,
    pub events_skipped: u64,
    pub reconnects: u32,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub output_path: PathBuf,
    pub stop_reason: StopReason,
}

impl SessionSummary {
    pub(crate) fn from_state(state: &SessionState, elapsed: Duration, stop_reason: StopReason) -> Self {
        Self {
            post_count: state.post_count,
            frames_received: state.frames_received,
            events_skipped: state.events_skipped,
            reconnects: state.reconnects,
            started_at: state.started_at,
            elapsed,
            output_path: state.output_path.clone(),
            stop_reason,
        }
    }

    /// Posts per second over the whole session, 0 if no time has passed.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.post_count as f64 / secs
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.stop_reason.is_fatal()
    }

    /// Log the summary block.
    pub fn report(&self) {
        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("COLLECTION COMPLETE");
        tracing::info!("═══════════════════════════════════════════════════════");
        tracing::info!("Posts collected:      {}", self.post_count);
        tracing::info!("Elapsed:              {:.2}s", self.elapsed.as_secs_f64());
        tracing::info!("Rate:                 {:.1} posts/sec", self.rate());
        tracing::info!("Output:               {}", self.output_path.display());
        tracing::info!("Started:              {}", self.started_at.to_rfc3339());
        tracing::info!("Frames received:      {}", self.frames_received);
        tracing::info!("Events skipped:       {}", self.events_skipped);
        tracing::info!("Reconnects:           {}", self.reconnects);
        if self.is_fatal() {
            tracing::error!("Stopped:              {}", self.stop_reason);
        } else {
            tracing::info!("Stopped:              {}", self.stop_reason);
        }
    }
}
