//! In-memory identity backends and transports for unit tests.

use crate::identity::{IdentityBackend, ResolvedIdentity};
use crate::source::{Subscription, Transport};
use crate::{Error, Result};

use parking_lot::Mutex;
use skyscrape_core::{CarBuilder, CommitEvent, OpAction, RepoOp, encode_commit_frame};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Identity
// =============================================================================

/// Backend answering from a fixed table; unknown DIDs fail.
#[derive(Clone, Default)]
pub struct StaticBackend {
    identities: HashMap<String, Vec<String>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handle(self, did: &str, handle: &str) -> Self {
        let alias = format!("at://{handle}");
        self.with_aliases(did, &[alias.as_str()])
    }

    pub fn with_aliases(mut self, did: &str, aliases: &[&str]) -> Self {
        self.identities.insert(
            did.to_string(),
            aliases.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared counter of `resolve` calls.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl IdentityBackend for StaticBackend {
    fn resolve(&self, did: &str) -> impl Future<Output = Result<ResolvedIdentity>> + Send {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let found = self.identities.get(did).cloned();
        let delay = self.delay;
        let did = did.to_string();

        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match found {
                Some(also_known_as) => Ok(ResolvedIdentity { did, also_known_as }),
                None => Err(Error::Resolution(format!("no document for {did}"))),
            }
        }
    }
}

// =============================================================================
// Transport
// =============================================================================

/// How one scripted connection attempt behaves.
pub enum Connection {
    /// The connect itself fails.
    Refuse,
    /// The connect fails with an error that cannot be retried.
    Reject(String),
    /// Deliver the frames, then report the peer closing the stream.
    Close(Vec<Vec<u8>>),
    /// Deliver the frames, then fail with a transport error.
    Fail(Vec<Vec<u8>>),
    /// Deliver the frames, then wait forever.
    Hang(Vec<Vec<u8>>),
}

#[derive(Default)]
struct Script {
    connections: VecDeque<Connection>,
    attempts: Vec<Instant>,
    closed: usize,
}

/// Transport that plays back a list of [`Connection`]s.
///
/// Once the script runs out every further connect is refused.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new(connections: impl IntoIterator<Item = Connection>) -> Self {
        let script = Script {
            connections: connections.into_iter().collect(),
            ..Default::default()
        };
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }

    /// Times at which `subscribe` was called.
    pub fn attempts(&self) -> Vec<Instant> {
        self.script.lock().attempts.clone()
    }

    /// Number of subscriptions that were closed by the caller.
    pub fn closed(&self) -> usize {
        self.script.lock().closed
    }
}

impl Transport for ScriptedTransport {
    type Subscription = ScriptedSubscription;

    fn name(&self) -> &str {
        "scripted"
    }

    fn subscribe(&self) -> impl Future<Output = Result<ScriptedSubscription>> + Send {
        let next = {
            let mut script = self.script.lock();
            script.attempts.push(Instant::now());
            script.connections.pop_front()
        };
        let script = Arc::clone(&self.script);

        async move {
            let (frames, end) = match next {
                None | Some(Connection::Refuse) => {
                    return Err(Error::Transport("connection refused".to_string()));
                }
                Some(Connection::Reject(reason)) => return Err(Error::Config(reason)),
                Some(Connection::Close(frames)) => (frames, End::Close),
                Some(Connection::Fail(frames)) => (frames, End::Fail),
                Some(Connection::Hang(frames)) => (frames, End::Hang),
            };
            Ok(ScriptedSubscription {
                frames: frames.into(),
                end,
                script,
            })
        }
    }
}

#[derive(Clone, Copy)]
enum End {
    Close,
    Fail,
    Hang,
}

pub struct ScriptedSubscription {
    frames: VecDeque<Vec<u8>>,
    end: End,
    script: Arc<Mutex<Script>>,
}

impl Subscription for ScriptedSubscription {
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let frame = self.frames.pop_front();
        let end = self.end;

        async move {
            if let Some(frame) = frame {
                return Ok(Some(frame));
            }
            match end {
                End::Close => Ok(None),
                End::Fail => Err(Error::Transport("connection reset".to_string())),
                End::Hang => std::future::pending().await,
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        self.script.lock().closed += 1;
        std::future::ready(())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A `#commit` frame from `repo` creating one post per text.
pub fn post_commit_frame(seq: i64, repo: &str, texts: &[&str]) -> Vec<u8> {
    let mut car = CarBuilder::new();
    let mut ops = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let record = serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": "2024-01-01T00:00:00Z",
        });
        let cid = car.add_record(&record).expect("encode record");
        car.root(cid);
        ops.push(RepoOp {
            action: OpAction::Create,
            path: format!("app.bsky.feed.post/{seq}x{i}"),
            cid: Some(cid),
        });
    }

    let event = CommitEvent {
        seq,
        repo: repo.to_string(),
        rev: format!("rev{seq}"),
        time: "2024-01-01T00:00:00Z".to_string(),
        ops,
        blocks: car.build().expect("build car"),
        too_big: false,
    };
    encode_commit_frame(&event).expect("encode frame")
}
