//! Sample transport
//!
//! Tasks report metrics over a byte stream instead of calling into the
//! stats objects directly.
//!
//! # Modules
//!
//! - `protocol`: Message definitions and framing
//! - `collector`: Applies received frames to a `PipelineStats`

pub mod collector;
pub mod protocol;

// Re-export key types
pub use collector::{Collector, CollectorSummary};
pub use protocol::{Message, PROTOCOL_VERSION};
