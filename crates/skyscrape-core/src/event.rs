//! Repository commit events.
//!
//! A [`CommitEvent`] is one atomic set of record mutations made by one
//! account, as delivered by a single `#commit` firehose frame.

use crate::POST_COLLECTION;
use cid::Cid;
use std::fmt;

/// The kind of mutation an operation applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpAction {
    Create,
    Update,
    Delete,
    /// An action this crate does not know about, kept verbatim.
    Other(String),
}

impl OpAction {
    /// Parse the wire representation.
    pub fn parse(s: &str) -> Self {
        match s {
            "create" => OpAction::Create,
            "update" => OpAction::Update,
            "delete" => OpAction::Delete,
            other => OpAction::Other(other.to_string()),
        }
    }

    /// The wire representation.
    pub fn as_str(&self) -> &str {
        match self {
            OpAction::Create => "create",
            OpAction::Update => "update",
            OpAction::Delete => "delete",
            OpAction::Other(s) => s,
        }
    }
}

impl fmt::Display for OpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One mutation within a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOp {
    pub action: OpAction,
    /// Collection-qualified record key: `<collection>/<rkey>`.
    pub path: String,
    /// CID of the new record block (absent for deletes).
    pub cid: Option<Cid>,
}

impl RepoOp {
    /// Whether this operation creates a feed post.
    pub fn is_post_create(&self) -> bool {
        self.action == OpAction::Create
            && self
                .path
                .strip_prefix(POST_COLLECTION)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// A decoded `#commit` frame body.
#[derive(Debug, Clone, Default)]
pub struct CommitEvent {
    /// Stream sequence number.
    pub seq: i64,
    /// DID of the repository (the author).
    pub repo: String,
    /// Repository revision after this commit.
    pub rev: String,
    /// Time the commit was emitted by the relay (ISO-8601, may be empty).
    pub time: String,
    /// Operations in commit order.
    pub ops: Vec<RepoOp>,
    /// CAR-encoded blocks referenced by the operations.
    pub blocks: Vec<u8>,
    /// Set by the relay when the commit was too large to include all blocks.
    pub too_big: bool,
}

impl CommitEvent {
    /// Operations that create feed posts, in commit order.
    pub fn post_creates(&self) -> impl Iterator<Item = &RepoOp> {
        self.ops.iter().filter(|op| op.is_post_create())
    }

    /// Build the `at://` URI for a record path in this repository.
    pub fn record_uri(&self, path: &str) -> String {
        format!("at://{}/{}", self.repo, path)
    }
}
