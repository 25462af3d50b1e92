//! Core error types

use thiserror::Error;

/// Errors raised by the core types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A pixel format that has no packed representation (depth, YUV, any)
    #[error("Pixel format has no packed representation: {0}")]
    UnpackableFormat(String),

    /// Source or destination row is shorter than `width` pixels
    #[error("Row too short: need {needed} bytes, got {actual}")]
    RowTooShort { needed: usize, actual: usize },

    /// Matrix stack popped past its base entry
    #[error("Matrix stack underflow")]
    StackUnderflow,

    /// Unknown debug option name
    #[error("Unknown debug option: {0}")]
    UnknownDebugOption(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
