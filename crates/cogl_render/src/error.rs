//! Render error types

use thiserror::Error;

/// Errors raised by the rendering engine
///
/// None of these come out of a journal flush; flushing degrades and logs
/// instead of failing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Attribute name is malformed or unknown
    #[error("Invalid attribute name: {0}")]
    InvalidAttributeName(String),

    /// Component count not accepted for this attribute name
    #[error("Attribute {name} does not accept {n_components} components")]
    InvalidComponentCount { name: String, n_components: u32 },

    /// Write outside the buffer's storage
    #[error("Buffer access out of range: offset {offset} + {len} exceeds {size}")]
    BufferOutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Buffer is already mapped
    #[error("Buffer {0} is already mapped")]
    BufferMapped(u32),

    /// Bind target already has a buffer bound
    #[error("Buffer bind target {0:?} is already in use")]
    BindTargetInUse(crate::buffer::BufferTarget),

    /// Handle refers to a pipeline that no longer exists
    #[error("Stale pipeline handle")]
    StalePipeline,

    /// Core error
    #[error(transparent)]
    Core(#[from] cogl_core::CoreError),
}

/// Result type for render operations
pub type Result<T> = std::result::Result<T, RenderError>;

/// Remembers which capability warnings were already logged so per-frame
/// paths only log them once
#[derive(Debug, Default)]
pub(crate) struct WarnOnce(rustc_hash::FxHashSet<String>);

impl WarnOnce {
    /// True the first time `key` is seen
    pub(crate) fn first(&mut self, key: impl Into<String>) -> bool {
        self.0.insert(key.into())
    }
}
