//! Live firehose source.
//!
//! Connects to a relay's `com.atproto.sync.subscribeRepos` endpoint over a
//! WebSocket and yields each binary message as a raw frame. Decoding is left
//! to the pipeline so malformed frames can be skipped one at a time.
//!
//! No cursor is sent: every subscription starts at the live head of the
//! stream.

use super::{Subscription, Transport};
use crate::{Error, Result};

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// XRPC method serving the repository event stream.
const SUBSCRIBE_REPOS_PATH: &str = "/xrpc/com.atproto.sync.subscribeRepos";

/// Configuration for the firehose client.
#[derive(Debug, Clone)]
pub struct FirehoseConfig {
    /// Relay base URL (`wss://host`), or a full subscribeRepos URL.
    pub relay_url: String,

    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://bsky.network".to_string(),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// WebSocket client for the repository event stream.
#[derive(Debug, Clone)]
pub struct FirehoseClient {
    config: FirehoseConfig,
    endpoint: String,
}

impl FirehoseClient {
    /// Create a client, validating the relay URL.
    pub fn new(config: FirehoseConfig) -> Result<Self> {
        let endpoint = subscription_url(&config.relay_url)?;
        Ok(Self { config, endpoint })
    }

    /// Full URL the client subscribes to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for FirehoseClient {
    type Subscription = FirehoseSubscription;

    fn name(&self) -> &str {
        "firehose"
    }

    fn subscribe(&self) -> impl Future<Output = Result<FirehoseSubscription>> + Send {
        let endpoint = self.endpoint.clone();
        let connect_timeout = self.config.connect_timeout;

        async move {
            tracing::debug!("Connecting to {}", endpoint);

            let (ws, _response) =
                tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str()))
                    .await
                    .map_err(|_| {
                        Error::Transport(format!(
                            "connecting to {} timed out after {:?}",
                            endpoint, connect_timeout
                        ))
                    })??;

            tracing::info!("Subscribed to {}", endpoint);
            Ok(FirehoseSubscription { ws, endpoint })
        }
    }
}

/// An open firehose WebSocket.
pub struct FirehoseSubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    endpoint: String,
}

impl Subscription for FirehoseSubscription {
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        async move {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!("Relay {} closed the stream: {:?}", self.endpoint, frame);
                        return Ok(None);
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Ignoring text frame from {}: {}", self.endpoint, text);
                    }
                    // Pings are answered by tungstenite on the next read.
                    Some(Ok(_)) => {}
                    Some(Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ))
                    | None => return Ok(None),
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }

    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(e) = self.ws.close(None).await {
                tracing::debug!("Failed to close {} cleanly: {}", self.endpoint, e);
            }
        }
    }
}

/// Build the subscribeRepos URL from a relay base URL.
fn subscription_url(relay_url: &str) -> Result<String> {
    let trimmed = relay_url.trim().trim_end_matches('/');

    if !(trimmed.starts_with("wss://") || trimmed.starts_with("ws://")) {
        return Err(Error::Config(format!(
            "relay URL must use ws:// or wss://, got '{}'",
            relay_url
        )));
    }

    if trimmed.ends_with(SUBSCRIBE_REPOS_PATH) {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{}{}", trimmed, SUBSCRIBE_REPOS_PATH))
    }
}
