//! Frame sources.
//!
//! The session controller consumes raw firehose frames through the
//! [`Transport`] trait, so the reconnect/termination logic can be driven by
//! the live [`FirehoseClient`] or by an in-memory source in tests.
//!
//! # Contract
//!
//! - [`Transport::subscribe`] opens a new subscription. Each call is a fresh
//!   connection; the session calls it again after a failure.
//! - [`Subscription::next_frame`] yields `Ok(Some(bytes))` per binary message,
//!   `Ok(None)` once the peer has closed the stream, and `Err` on a
//!   transport failure. It must be cancel-safe: the session wraps it in a
//!   timeout to poll for shutdown.

mod firehose;

pub use firehose::{FirehoseClient, FirehoseConfig, FirehoseSubscription};

use crate::Result;
use std::future::Future;

/// A source of firehose subscriptions.
pub trait Transport {
    /// The open subscription type.
    type Subscription: Subscription;

    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &str;

    /// Open a new subscription.
    fn subscribe(&self) -> impl Future<Output = Result<Self::Subscription>> + Send;
}

/// An open stream of raw frames.
pub trait Subscription: Send {
    /// Wait for the next binary frame.
    fn next_frame(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Close the subscription. Errors are logged, not returned.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
