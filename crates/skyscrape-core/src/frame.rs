//! Firehose frame decoding.
//!
//! Each binary WebSocket message on `com.atproto.sync.subscribeRepos` is two
//! concatenated DAG-CBOR values:
//!
//! ```text
//! [header {op: 1, t: "#commit"}][body {...}]
//! [header {op: -1}]             [body {error, message}]
//! ```
//!
//! Only `#commit` bodies are decoded into a typed [`CommitEvent`]. Other
//! message kinds (`#identity`, `#account`, `#sync`, `#info`, ...) are surfaced
//! as [`Frame::Other`] so the caller can count and skip them.

use crate::cbor;
use crate::error::{Error, Result};
use crate::event::{CommitEvent, OpAction, RepoOp};
use ciborium::Value;

/// Header `op` value for a regular message.
const OP_MESSAGE: i64 = 1;

/// Header `op` value for an error frame.
const OP_ERROR: i64 = -1;

/// Message type of a repository commit.
pub const COMMIT_TYPE: &str = "#commit";

/// A decoded firehose frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A repository commit.
    Commit(CommitEvent),
    /// A message kind this pipeline does not process.
    Other {
        /// The header `t` value, e.g. `#identity`.
        kind: String,
        /// Sequence number, when the body carries one.
        seq: Option<i64>,
    },
    /// The relay reported an error and will close the stream.
    Error {
        error: String,
        message: Option<String>,
    },
}

/// Decode one firehose message.
///
/// # Errors
///
/// Returns an error if either CBOR value is malformed or the header/body
/// lack required fields.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    let mut reader = bytes;
    let header = cbor::read_value(&mut reader)?;
    let header = cbor::as_map(&header, "frame header")?;

    let op = cbor::get_int(header, "op")
        .ok_or_else(|| Error::Frame("header is missing op".to_string()))?;

    if reader.is_empty() {
        return Err(Error::Frame("frame has no body".to_string()));
    }
    let body = cbor::read_value(&mut reader)?;
    let body = cbor::as_map(&body, "frame body")?;

    match op {
        OP_ERROR => Ok(Frame::Error {
            error: cbor::get_text(body, "error")
                .unwrap_or("Unknown")
                .to_string(),
            message: cbor::get_text(body, "message").map(str::to_string),
        }),
        OP_MESSAGE => {
            let kind = cbor::get_text(header, "t")
                .ok_or_else(|| Error::Frame("message header is missing t".to_string()))?;
            if kind == COMMIT_TYPE {
                Ok(Frame::Commit(decode_commit(body)?))
            } else {
                Ok(Frame::Other {
                    kind: kind.to_string(),
                    seq: cbor::get_int(body, "seq"),
                })
            }
        }
        other => Err(Error::Frame(format!("unknown header op {other}"))),
    }
}

fn decode_commit(body: &[(Value, Value)]) -> Result<CommitEvent> {
    let repo = cbor::get_text(body, "repo")
        .ok_or_else(|| Error::Frame("commit is missing repo".to_string()))?
        .to_string();

    let ops = match cbor::get(body, "ops") {
        Some(Value::Array(items)) => items.iter().map(decode_op).collect::<Result<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(Error::Frame("commit ops is not an array".to_string())),
    };

    let blocks = match cbor::get(body, "blocks") {
        Some(Value::Bytes(b)) => b.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(Error::Frame("commit blocks is not a byte string".to_string())),
    };

    Ok(CommitEvent {
        seq: cbor::get_int(body, "seq").unwrap_or_default(),
        repo,
        rev: cbor::get_text(body, "rev").unwrap_or_default().to_string(),
        time: cbor::get_text(body, "time").unwrap_or_default().to_string(),
        ops,
        blocks,
        too_big: cbor::get_bool(body, "tooBig").unwrap_or(false),
    })
}

fn decode_op(value: &Value) -> Result<RepoOp> {
    let map = cbor::as_map(value, "repo op")?;
    let action = cbor::get_text(map, "action")
        .ok_or_else(|| Error::Frame("repo op is missing action".to_string()))?;
    let path = cbor::get_text(map, "path")
        .ok_or_else(|| Error::Frame("repo op is missing path".to_string()))?;
    let cid = match cbor::get(map, "cid") {
        Some(Value::Tag(cbor::CID_TAG, payload)) => Some(cbor::cid_from_link(payload)?),
        Some(Value::Null) | None => None,
        Some(_) => return Err(Error::Frame("repo op cid is not a CID link".to_string())),
    };

    Ok(RepoOp {
        action: OpAction::parse(action),
        path: path.to_string(),
        cid,
    })
}

/// Encode a commit as a firehose frame.
///
/// Produces the same layout the relay sends, so the result can be fed back
/// through [`decode_frame`].
pub fn encode_commit_frame(event: &CommitEvent) -> Result<Vec<u8>> {
    let header = Value::Map(vec![
        (text("op"), Value::Integer(OP_MESSAGE.into())),
        (text("t"), text(COMMIT_TYPE)),
    ]);

    let ops = event
        .ops
        .iter()
        .map(|op| {
            Value::Map(vec![
                (text("action"), text(op.action.as_str())),
                (text("path"), text(&op.path)),
                (
                    text("cid"),
                    op.cid.as_ref().map_or(Value::Null, cbor::link_value),
                ),
            ])
        })
        .collect();

    let body = Value::Map(vec![
        (text("seq"), Value::Integer(event.seq.into())),
        (text("repo"), text(&event.repo)),
        (text("rev"), text(&event.rev)),
        (text("time"), text(&event.time)),
        (text("ops"), Value::Array(ops)),
        (text("blocks"), Value::Bytes(event.blocks.clone())),
        (text("tooBig"), Value::Bool(event.too_big)),
    ]);

    let mut out = cbor::encode(&header)?;
    out.extend(cbor::encode(&body)?);
    Ok(out)
}

/// Encode an error frame (`op: -1`).
pub fn encode_error_frame(error: &str, message: Option<&str>) -> Result<Vec<u8>> {
    let header = Value::Map(vec![(text("op"), Value::Integer(OP_ERROR.into()))]);
    let mut body = vec![(text("error"), text(error))];
    if let Some(message) = message {
        body.push((text("message"), text(message)));
    }

    let mut out = cbor::encode(&header)?;
    out.extend(cbor::encode(&Value::Map(body))?);
    Ok(out)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::CarBuilder;
    use serde_json::json;

    fn sample_commit() -> CommitEvent {
        let mut car = CarBuilder::new();
        let cid = car
            .add_record(&json!({"$type": "app.bsky.feed.post", "text": "hi"}))
            .unwrap();
        CommitEvent {
            seq: 42,
            repo: "did:plc:xyz".to_string(),
            rev: "3kabc".to_string(),
            time: "2024-01-01T00:00:00Z".to_string(),
            ops: vec![
                RepoOp {
                    action: OpAction::Create,
                    path: "app.bsky.feed.post/abc123".to_string(),
                    cid: Some(cid),
                },
                RepoOp {
                    action: OpAction::Delete,
                    path: "app.bsky.feed.like/old".to_string(),
                    cid: None,
                },
            ],
            blocks: car.build().unwrap(),
            too_big: false,
        }
    }

    // =========================================================================
    // Commit frames
    // =========================================================================

    #[test]
    fn test_decode_commit_frame() {
        let commit = sample_commit();
        let bytes = encode_commit_frame(&commit).unwrap();

        let Frame::Commit(decoded) = decode_frame(&bytes).unwrap() else {
            panic!("expected a commit frame");
        };
        assert_eq!(decoded.seq, 42);
        assert_eq!(decoded.repo, "did:plc:xyz");
        assert_eq!(decoded.time, "2024-01-01T00:00:00Z");
        assert_eq!(decoded.ops, commit.ops);
        assert_eq!(decoded.blocks, commit.blocks);
    }

    #[test]
    fn test_commit_without_repo_is_rejected() {
        let mut bytes = cbor::encode(&json!({"op": 1, "t": "#commit"})).unwrap();
        bytes.extend(cbor::encode(&json!({"seq": 1, "ops": []})).unwrap());

        let err = decode_frame(&bytes).unwrap_err();
        assert!(err.to_string().contains("missing repo"));
    }

    // =========================================================================
    // Other frames
    // =========================================================================

    #[test]
    fn test_decode_identity_frame_as_other() {
        let mut bytes = cbor::encode(&json!({"op": 1, "t": "#identity"})).unwrap();
        bytes.extend(cbor::encode(&json!({"seq": 7, "did": "did:plc:abc"})).unwrap());

        match decode_frame(&bytes).unwrap() {
            Frame::Other { kind, seq } => {
                assert_eq!(kind, "#identity");
                assert_eq!(seq, Some(7));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_frame() {
        let bytes = encode_error_frame("ConsumerTooSlow", Some("slow down")).unwrap();
        match decode_frame(&bytes).unwrap() {
            Frame::Error { error, message } => {
                assert_eq!(error, "ConsumerTooSlow");
                assert_eq!(message.as_deref(), Some("slow down"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_header_only_frame_is_rejected() {
        let bytes = cbor::encode(&json!({"op": 1, "t": "#commit"})).unwrap();
        assert!(matches!(decode_frame(&bytes), Err(Error::Frame(_))));
    }

    #[test]
    fn test_garbage_frame_is_rejected() {
        assert!(decode_frame(b"not cbor at all").is_err());
    }
}
