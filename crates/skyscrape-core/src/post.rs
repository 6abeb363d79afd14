//! Feed post records.
//!
//! [`FeedPost`] is a typed view over a dynamically typed record: it checks
//! the `$type` discriminant once and then exposes the handful of fields the
//! pipeline cares about, returning defaults for anything missing.
//!
//! [`PostRecord`] is the normalized output line.

use crate::{EMBED_EXTERNAL_TYPE, EMBED_IMAGES_TYPE, POST_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One collected post, as written to the output file.
///
/// Serializes to exactly six fields. `reply_to` is written as `null` for
/// top-level posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub text: String,
    pub created_at: String,
    /// Resolved handle, or the author's DID if resolution failed.
    pub author: String,
    /// `at://<repo>/<path>`.
    pub uri: String,
    pub has_images: bool,
    pub reply_to: Option<String>,
}

/// A record that has been verified to be an `app.bsky.feed.post`.
#[derive(Debug, Clone, Copy)]
pub struct FeedPost<'a> {
    record: &'a Value,
}

impl<'a> FeedPost<'a> {
    /// View `record` as a feed post, or `None` if its `$type` is anything else.
    pub fn parse(record: &'a Value) -> Option<Self> {
        (record_type(record) == Some(POST_TYPE)).then_some(Self { record })
    }

    /// Post text, empty if absent.
    pub fn text(&self) -> &'a str {
        self.str_field("text")
    }

    /// Client-declared creation timestamp, empty if absent.
    pub fn created_at(&self) -> &'a str {
        self.str_field("createdAt")
    }

    /// Whether the post carries image media.
    ///
    /// True for image embeds, and for external link cards whose embed
    /// object carries a `thumb` field itself.
    pub fn has_images(&self) -> bool {
        let Some(embed) = self.record.get("embed") else {
            return false;
        };
        match record_type(embed) {
            Some(EMBED_IMAGES_TYPE) => true,
            Some(EMBED_EXTERNAL_TYPE) => embed.get("thumb").is_some(),
            _ => false,
        }
    }

    /// URI of the post this one replies to.
    pub fn reply_parent_uri(&self) -> Option<&'a str> {
        self.record
            .get("reply")?
            .get("parent")?
            .get("uri")?
            .as_str()
    }

    /// Build the output record.
    pub fn to_record(&self, uri: String, author: &str) -> PostRecord {
        PostRecord {
            text: self.text().to_string(),
            created_at: self.created_at().to_string(),
            author: author.to_string(),
            uri,
            has_images: self.has_images(),
            reply_to: self.reply_parent_uri().map(str::to_string),
        }
    }

    fn str_field(&self, key: &str) -> &'a str {
        self.record.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

/// The `$type` discriminant of a record or object, if present.
pub fn record_type(value: &Value) -> Option<&str> {
    value.get("$type").and_then(Value::as_str)
}
