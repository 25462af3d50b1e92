//! Process-wide debug flags
//!
//! Debug flags change how the journal batches and logs. They are global
//! state shared by every context in the process, held behind a single
//! mutex.
//!
//! # Initialization
//!
//! ```ignore
//! // Read COGL_DEBUG once at startup
//! cogl_core::debug::init_from_env();
//!
//! // Or set flags explicitly
//! cogl_core::debug::set(DebugFlags::DISABLE_BATCHING);
//! ```
//!
//! `reset` restores the empty set, which is what tests use for teardown.

use crate::error::{CoreError, Result};
use bitflags::bitflags;
use std::sync::{Mutex, PoisonError};

bitflags! {
    /// Diagnostics and feature switches for the rendering engine
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u32 {
        /// Dump every logged quad and each stride batch
        const JOURNAL = 1 << 0;
        /// Log batch lengths at every level of the flush cascade
        const BATCHING = 1 << 1;
        /// Flush the journal after every logged quad
        const DISABLE_BATCHING = 1 << 2;
        /// Keep vertices in model space and batch by modelview instead
        const DISABLE_SOFTWARE_TRANSFORM = 1 << 3;
        /// Never enable blending
        const DISABLE_BLENDING = 1 << 4;
        /// Always program the GPU for clipping
        const DISABLE_SOFTWARE_CLIP = 1 << 5;
        /// Outline each batch with a colored line loop
        const RECTANGLES = 1 << 6;
        /// Log clip decisions
        const CLIPPING = 1 << 7;
        /// Allocate a fresh vertex buffer per flush instead of pooling
        const DISABLE_VBOS = 1 << 8;
    }
}

const OPTION_NAMES: &[(&str, DebugFlags)] = &[
    ("journal", DebugFlags::JOURNAL),
    ("batching", DebugFlags::BATCHING),
    ("disable-batching", DebugFlags::DISABLE_BATCHING),
    ("disable-software-transform", DebugFlags::DISABLE_SOFTWARE_TRANSFORM),
    ("disable-blending", DebugFlags::DISABLE_BLENDING),
    ("disable-software-clip", DebugFlags::DISABLE_SOFTWARE_CLIP),
    ("rectangles", DebugFlags::RECTANGLES),
    ("clipping", DebugFlags::CLIPPING),
    ("disable-vbos", DebugFlags::DISABLE_VBOS),
];

/// Environment variable read by [`init_from_env`]
pub const DEBUG_ENV_VAR: &str = "COGL_DEBUG";

impl DebugFlags {
    /// Parse a comma or space separated option list. `all` enables every
    /// flag; unknown names are an error.
    pub fn parse(list: &str) -> Result<DebugFlags> {
        let mut flags = DebugFlags::empty();
        for name in list
            .split(|c: char| c == ',' || c == ':' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let name = name.to_ascii_lowercase();
            if name == "all" {
                flags |= DebugFlags::all();
                continue;
            }
            match OPTION_NAMES.iter().find(|(n, _)| *n == name) {
                Some((_, flag)) => flags |= *flag,
                None => return Err(CoreError::UnknownDebugOption(name)),
            }
        }
        Ok(flags)
    }

    /// Parse `COGL_DEBUG`, warning about and skipping unknown names
    pub fn from_env() -> DebugFlags {
        let Ok(value) = std::env::var(DEBUG_ENV_VAR) else {
            return DebugFlags::empty();
        };
        let mut flags = DebugFlags::empty();
        for name in value
            .split(|c: char| c == ',' || c == ':' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            match DebugFlags::parse(name) {
                Ok(f) => flags |= f,
                Err(err) => tracing::warn!("Ignoring {}: {}", DEBUG_ENV_VAR, err),
            }
        }
        flags
    }
}

/// Global debug flag state
static DEBUG_FLAGS: Mutex<DebugFlags> = Mutex::new(DebugFlags::empty());

/// Current flags
pub fn flags() -> DebugFlags {
    *DEBUG_FLAGS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Whether every flag in `flag` is set
pub fn enabled(flag: DebugFlags) -> bool {
    flags().contains(flag)
}

/// Add flags
pub fn set(flag: DebugFlags) {
    let mut guard = DEBUG_FLAGS.lock().unwrap_or_else(PoisonError::into_inner);
    *guard |= flag;
}

/// Remove flags
pub fn clear(flag: DebugFlags) {
    let mut guard = DEBUG_FLAGS.lock().unwrap_or_else(PoisonError::into_inner);
    guard.remove(flag);
}

/// Replace the whole flag set
pub fn replace(flags: DebugFlags) -> DebugFlags {
    let mut guard = DEBUG_FLAGS.lock().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *guard, flags)
}

/// Initialize from `COGL_DEBUG`, adding to whatever is already set
pub fn init_from_env() {
    let from_env = DebugFlags::from_env();
    if !from_env.is_empty() {
        tracing::debug!("Debug flags from {}: {:?}", DEBUG_ENV_VAR, from_env);
        set(from_env);
    }
}

/// Clear every flag
pub fn reset() {
    replace(DebugFlags::empty());
}
