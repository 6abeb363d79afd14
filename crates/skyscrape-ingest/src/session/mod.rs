//! Collection sessions.
//!
//! A [`Session`] owns the transport, extractor and sink for one run and
//! returns a [`SessionSummary`] when it stops.

mod controller;
mod summary;

pub use controller::{
    Session, SessionConfig, SessionPhase, SessionState, StopCondition, StopReason,
};
pub use summary::SessionSummary;
