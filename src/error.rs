//! Error types for stats aggregation
//!
//! Everything here is recoverable from the caller's point of view except
//! [`StatsError::OutOfOrderWindow`], which signals a bug in the consuming loop.

/// Convenience alias for operations that fail with a [`StatsError`].
pub type StatsResult<T> = std::result::Result<T, StatsError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StatsError {
    /// A sample arrived for a stage whose summary is already finalized.
    #[error("late sample for finalized stage '{stage}' in window {window_index}")]
    LateSample { window_index: u64, stage: String },

    /// A sample arrived for a stage whose output was reused from a prior window.
    #[error("sample for cached stage '{stage}' in window {window_index}")]
    CachedStage { window_index: u64, stage: String },

    /// No stage with this id was declared in the window.
    #[error("unknown stage {stage_id} in window {window_index}")]
    UnknownStage { window_index: u64, stage_id: usize },

    /// The sample failed validation (NaN, negative value, empty node id, ...).
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    /// `finalize` was called twice on the same stage.
    #[error("stage '{stage}' already finalized")]
    AlreadyFinalized { stage: String },

    /// A window was appended or opened with an index other than the next one.
    #[error("out of order window: expected index {expected}, got {got}")]
    OutOfOrderWindow { expected: u64, got: u64 },

    /// The window has not been opened, or was already completed.
    #[error("window {0} is not open")]
    WindowNotOpen(u64),
}
