//! Bluesky firehose post collection.
//!
//! This crate turns the live repository event stream into a JSON Lines file
//! of newly created posts.
//!
//! # Modules
//!
//! - [`source`] - Transport trait and the WebSocket firehose client
//! - [`identity`] - DID → handle resolution with a process-lifetime cache
//! - [`pipeline`] - Post extraction and the JSONL output sink
//! - [`session`] - Stop conditions, reconnect backoff and the final summary
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ FirehoseClient  │  subscribeRepos WebSocket, raw frames
//! └────────┬────────┘
//!          │  decode_frame (skyscrape-core)
//!          ▼
//! ┌─────────────────┐      ┌────────────────┐
//! │  PostExtractor  │─────►│ HandleResolver │  cached DID documents
//! └────────┬────────┘      └────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │    JsonlSink    │  one PostRecord per line
//! └─────────────────┘
//! ```
//!
//! [`Session`] wraps the whole chain and decides when to reconnect and when
//! to stop.

pub mod error;
pub mod identity;
pub mod pipeline;
pub mod session;
pub mod source;

#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, Result};

pub use identity::{
    CacheStats, HandleCache, HandleResolver, HttpResolver, HttpResolverConfig, IdentityBackend,
    ResolvedIdentity,
};

pub use pipeline::{ExtractMode, JsonlSink, PostExtractor};

pub use session::{
    Session, SessionConfig, SessionPhase, SessionState, SessionSummary, StopCondition, StopReason,
};

pub use source::{FirehoseClient, FirehoseConfig, FirehoseSubscription, Subscription, Transport};
