//! Central error handling for the label placement engine.
//!
//! Placement itself never fails hard: not-ready resources and exhausted
//! budgets are handled locally by skipping work for one frame. The error
//! type covers the few fallible seams (canvas capacity, host-supplied
//! configuration).

/// Centralized error type for label engine operations.
#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    /// The text canvas ran out of glyph storage for this frame.
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A host-supplied option value is out of range.
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

impl LabelError {
    /// Convenience constructors for common error types.
    pub fn capacity<T: ToString>(msg: T) -> Self {
        LabelError::CapacityExceeded(msg.to_string())
    }

    pub fn option<T: ToString>(msg: T) -> Self {
        LabelError::InvalidOption(msg.to_string())
    }
}

/// Result type alias for label engine operations.
pub type LabelResult<T> = Result<T, LabelError>;
