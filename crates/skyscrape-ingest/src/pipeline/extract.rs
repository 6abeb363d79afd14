//! Post extraction from commit events.
//!
//! A commit is only looked at if it contains at least one `create` operation
//! in the `app.bsky.feed.post` collection. For those commits the author is
//! resolved once and the block bundle is decoded once; posts are then built
//! from the decoded records according to the [`ExtractMode`].

use crate::Result;
use crate::identity::{HandleResolver, IdentityBackend};

use skyscrape_core::{BlockBundle, CommitEvent, FeedPost, PostRecord, RepoOp};

/// How post records are located in a commit's block bundle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtractMode {
    /// Emit every post-typed record in the bundle, in bundle order.
    ///
    /// A record takes its path from the create operation whose CID matches
    /// its block, or from the first create operation when none does.
    #[default]
    BundleWide,

    /// Emit one post per create operation, looked up by the operation's CID.
    PerOperation,
}

/// Turns commit events into [`PostRecord`]s.
pub struct PostExtractor<B> {
    resolver: HandleResolver<B>,
    mode: ExtractMode,
}

impl<B: IdentityBackend> PostExtractor<B> {
    pub fn new(resolver: HandleResolver<B>, mode: ExtractMode) -> Self {
        Self { resolver, mode }
    }

    /// Extract the new posts carried by `event`.
    ///
    /// Returns an empty list without any identity lookup when the event has
    /// no post-creating operation.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the block bundle is malformed. Resolution
    /// failures are not errors; the author falls back to the DID.
    pub async fn extract_posts(&self, event: &CommitEvent) -> Result<Vec<PostRecord>> {
        let creates: Vec<&RepoOp> = event.post_creates().collect();
        if creates.is_empty() {
            return Ok(Vec::new());
        }

        let bundle = BlockBundle::decode(&event.blocks)?;
        let author = self.resolver.resolve_handle(&event.repo).await;

        let posts = match self.mode {
            ExtractMode::BundleWide => bundle_wide(event, &bundle, &creates, &author),
            ExtractMode::PerOperation => per_operation(event, &bundle, &creates, &author),
        };

        if posts.is_empty() {
            tracing::debug!(
                repo = %event.repo,
                seq = event.seq,
                "commit has {} post create(s) but no post records",
                creates.len()
            );
        }

        Ok(posts)
    }
}

fn bundle_wide(
    event: &CommitEvent,
    bundle: &BlockBundle,
    creates: &[&RepoOp],
    author: &str,
) -> Vec<PostRecord> {
    let Some(first) = creates.first() else {
        return Vec::new();
    };

    bundle
        .iter()
        .filter_map(|block| {
            let post = FeedPost::parse(&block.record)?;
            let op = creates
                .iter()
                .find(|op| op.cid.as_ref() == Some(&block.cid))
                .unwrap_or(first);
            Some(post.to_record(event.record_uri(&op.path), author))
        })
        .collect()
}

fn per_operation(
    event: &CommitEvent,
    bundle: &BlockBundle,
    creates: &[&RepoOp],
    author: &str,
) -> Vec<PostRecord> {
    creates
        .iter()
        .filter_map(|op| {
            let record = bundle.get(op.cid.as_ref()?)?;
            let post = FeedPost::parse(record)?;
            Some(post.to_record(event.record_uri(&op.path), author))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::testing::StaticBackend;
    use serde_json::{Value, json};
    use skyscrape_core::{CarBuilder, Cid, OpAction};
    use std::sync::atomic::Ordering;

    const DID: &str = "did:plc:xyz";

    fn extractor(backend: StaticBackend, mode: ExtractMode) -> PostExtractor<StaticBackend> {
        PostExtractor::new(HandleResolver::new(backend), mode)
    }

    fn op(action: OpAction, path: &str, cid: Option<Cid>) -> RepoOp {
        RepoOp {
            action,
            path: path.to_string(),
            cid,
        }
    }

    fn post(text: &str) -> Value {
        json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": "2024-01-01T00:00:00Z",
        })
    }

    /// A commit creating one post per record, with matching CIDs.
    fn commit(records: &[Value]) -> CommitEvent {
        let mut car = CarBuilder::new();
        let mut ops = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let cid = car.add_record(record).unwrap();
            ops.push(op(
                OpAction::Create,
                &format!("app.bsky.feed.post/rkey{i}"),
                Some(cid),
            ));
        }
        CommitEvent {
            seq: 1,
            repo: DID.to_string(),
            ops,
            blocks: car.build().unwrap(),
            ..Default::default()
        }
    }

    async fn extract_one(record: Value) -> PostRecord {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut posts = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&commit(&[record]))
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        posts.remove(0)
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    #[tokio::test]
    async fn test_no_ops_yields_nothing() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let calls = backend.calls();
        let event = CommitEvent {
            repo: DID.to_string(),
            blocks: vec![0xff],
            ..Default::default()
        };

        let posts = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();

        assert!(posts.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_matching_ops_skip_resolution() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let calls = backend.calls();
        let mut event = commit(&[post("hello")]);
        event.ops = vec![
            op(OpAction::Delete, "app.bsky.feed.post/abc", None),
            op(OpAction::Update, "app.bsky.feed.post/abc", None),
            op(OpAction::Create, "app.bsky.feed.like/abc", None),
            op(OpAction::Create, "app.bsky.feed.postgate/abc", None),
        ];

        for mode in [ExtractMode::BundleWide, ExtractMode::PerOperation] {
            let posts = extractor(backend.clone(), mode)
                .extract_posts(&event)
                .await
                .unwrap();
            assert!(posts.is_empty());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_post_records_are_ignored() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let event = commit(&[json!({
            "$type": "app.bsky.feed.like",
            "subject": {"uri": "at://did:plc:abc/app.bsky.feed.post/1"},
        })]);

        let posts = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();
        assert!(posts.is_empty());
    }

    // =========================================================================
    // Field extraction
    // =========================================================================

    #[tokio::test]
    async fn test_basic_post() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut car = CarBuilder::new();
        let cid = car.add_record(&post("hello")).unwrap();
        let event = CommitEvent {
            repo: DID.to_string(),
            ops: vec![op(OpAction::Create, "app.bsky.feed.post/abc123", Some(cid))],
            blocks: car.build().unwrap(),
            ..Default::default()
        };

        let posts = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();

        assert_eq!(
            posts,
            vec![PostRecord {
                text: "hello".to_string(),
                created_at: "2024-01-01T00:00:00Z".to_string(),
                author: "alice.test".to_string(),
                uri: "at://did:plc:xyz/app.bsky.feed.post/abc123".to_string(),
                has_images: false,
                reply_to: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_missing_fields_default_to_empty() {
        let post = extract_one(json!({"$type": "app.bsky.feed.post"})).await;
        assert_eq!(post.text, "");
        assert_eq!(post.created_at, "");
        assert!(!post.has_images);
    }

    #[tokio::test]
    async fn test_has_images_by_embed() {
        let cases = [
            (
                json!({"$type": "app.bsky.embed.images", "images": []}),
                true,
            ),
            (
                json!({"$type": "app.bsky.embed.external", "thumb": {"$type": "blob"}}),
                true,
            ),
            (
                json!({
                    "$type": "app.bsky.embed.external",
                    "external": {"uri": "https://example.com", "thumb": {"$type": "blob"}},
                }),
                false,
            ),
            (
                json!({
                    "$type": "app.bsky.embed.external",
                    "external": {"uri": "https://example.com"},
                }),
                false,
            ),
            (
                json!({"$type": "app.bsky.embed.record", "record": {}}),
                false,
            ),
        ];

        for (embed, expected) in cases {
            let mut record = post("with embed");
            record["embed"] = embed.clone();
            assert_eq!(extract_one(record).await.has_images, expected, "{embed}");
        }

        assert!(!extract_one(post("no embed")).await.has_images);
    }

    #[tokio::test]
    async fn test_reply_parent_passed_through() {
        let parent = "at://did:plc:abc/app.bsky.feed.post/parent";
        let mut record = post("reply");
        record["reply"] = json!({
            "root": {"uri": "at://did:plc:abc/app.bsky.feed.post/root", "cid": "bafyroot"},
            "parent": {"uri": parent, "cid": "bafyparent"},
        });

        assert_eq!(extract_one(record).await.reply_to.as_deref(), Some(parent));
        assert_eq!(extract_one(post("top level")).await.reply_to, None);
    }

    // =========================================================================
    // Author resolution
    // =========================================================================

    #[tokio::test]
    async fn test_resolution_failure_falls_back_to_did() {
        let posts = extractor(StaticBackend::new(), ExtractMode::BundleWide)
            .extract_posts(&commit(&[post("hello")]))
            .await
            .unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author, DID);
    }

    #[tokio::test]
    async fn test_author_resolved_once_per_event() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let calls = backend.calls();
        let extractor = extractor(backend, ExtractMode::BundleWide);

        let posts = extractor
            .extract_posts(&commit(&[post("one"), post("two"), post("three")]))
            .await
            .unwrap();
        assert_eq!(posts.len(), 3);
        assert!(posts.iter().all(|p| p.author == "alice.test"));

        extractor.extract_posts(&commit(&[post("four")])).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // Block selection
    // =========================================================================

    #[tokio::test]
    async fn test_bundle_wide_paths_follow_cids() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut event = commit(&[post("first"), post("second")]);
        event.ops.reverse();

        let posts = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();

        assert_eq!(posts[0].text, "first");
        assert!(posts[0].uri.ends_with("/rkey0"));
        assert_eq!(posts[1].text, "second");
        assert!(posts[1].uri.ends_with("/rkey1"));
    }

    #[tokio::test]
    async fn test_bundle_wide_unmatched_record_uses_first_create() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut car = CarBuilder::new();
        car.add_record(&post("orphan")).unwrap();
        let event = CommitEvent {
            repo: DID.to_string(),
            ops: vec![op(OpAction::Create, "app.bsky.feed.post/only", None)],
            blocks: car.build().unwrap(),
            ..Default::default()
        };

        let bundle_wide = extractor(backend.clone(), ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();
        assert_eq!(bundle_wide.len(), 1);
        assert_eq!(bundle_wide[0].uri, "at://did:plc:xyz/app.bsky.feed.post/only");

        let per_op = extractor(backend, ExtractMode::PerOperation)
            .extract_posts(&event)
            .await
            .unwrap();
        assert!(per_op.is_empty());
    }

    #[tokio::test]
    async fn test_per_operation_ignores_unreferenced_posts() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut event = commit(&[post("referenced"), post("unreferenced")]);
        event.ops.truncate(1);

        let per_op = extractor(backend.clone(), ExtractMode::PerOperation)
            .extract_posts(&event)
            .await
            .unwrap();
        assert_eq!(per_op.len(), 1);
        assert_eq!(per_op[0].text, "referenced");

        let bundle_wide = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap();
        assert_eq!(bundle_wide.len(), 2);
    }

    // =========================================================================
    // Errors
    // =========================================================================

    #[tokio::test]
    async fn test_malformed_blocks_are_decode_errors() {
        let backend = StaticBackend::new().with_handle(DID, "alice.test");
        let mut event = commit(&[post("hello")]);
        event.blocks.truncate(event.blocks.len() - 3);

        let err = extractor(backend, ExtractMode::BundleWide)
            .extract_posts(&event)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }
}
