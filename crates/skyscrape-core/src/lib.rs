//! Core types and decoders for the skyscrape firehose collector.
//!
//! This crate provides:
//! - Firehose frame decoding (`#commit` bodies into [`CommitEvent`]s)
//! - CARv1 block bundle decoding into AT Protocol JSON records
//! - A typed view over `app.bsky.feed.post` records and the output [`PostRecord`]
//! - Prometheus metrics helpers
//! - Shared error types

pub mod car;
pub mod cbor;
mod error;
mod event;
mod frame;
pub mod metrics;
mod post;

// ═══════════════════════════════════════════════════════════════════════════
// Lexicon identifiers
// ═══════════════════════════════════════════════════════════════════════════

/// Collection holding feed posts; record paths are `app.bsky.feed.post/<rkey>`.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// `$type` of a feed post record.
pub const POST_TYPE: &str = "app.bsky.feed.post";

/// `$type` of an image embed.
pub const EMBED_IMAGES_TYPE: &str = "app.bsky.embed.images";

/// `$type` of an external link card embed.
pub const EMBED_EXTERNAL_TYPE: &str = "app.bsky.embed.external";

pub use cid::Cid;

pub use car::{Block, BlockBundle, CarBuilder};
pub use error::{Error, Result};
pub use event::{CommitEvent, OpAction, RepoOp};
pub use frame::{COMMIT_TYPE, Frame, decode_frame, encode_commit_frame, encode_error_frame};
pub use post::{FeedPost, PostRecord, record_type};
