//! Per-event processing pipeline.
//!
//! # Architecture
//!
//! ```text
//! [Frame] → [PostExtractor] → [JsonlSink]
//!                 ↓
//!          [HandleResolver]
//! ```
//!
//! Every stage handles one event at a time; output order is arrival order.

mod extract;
mod sink;

pub use extract::{ExtractMode, PostExtractor};
pub use sink::JsonlSink;
