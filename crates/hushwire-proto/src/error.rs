//! Protocol error types.

use thiserror::Error;

/// Errors from frame parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame was not valid JSON or did not match any known frame shape
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Parser diagnostics
        reason: String,
    },
}
