//! Cogl Core
//!
//! Leaf types shared by the rendering engine:
//!
//! - **Matrices**: column-major 4x4 matrices and change-tracked matrix stacks
//! - **Clip stacks**: persistent, pointer-comparable clip state
//! - **Colors**: exact 8-bit RGBA
//! - **Pixel packing**: row conversion between pixel formats
//! - **Debug flags**: process-wide diagnostics switches
//! - **Progress functions**: process-wide interpolation registry
//!
//! # Example
//!
//! ```rust
//! use cogl_core::{ClipStack, Matrix, MatrixStack};
//!
//! let mut modelview = MatrixStack::new();
//! modelview.translate(10.0, 0.0, 0.0);
//!
//! let clip = ClipStack::push_rectangle(None, 0.0, 0.0, 50.0, 50.0, &modelview.get());
//! let same = clip.clone();
//! assert!(ClipStack::ptr_eq(Some(&clip), Some(&same)));
//! assert_eq!(clip.bounds().x0, 10);
//! ```

pub mod bitmap;
pub mod clip_stack;
pub mod color;
pub mod debug;
pub mod error;
pub mod matrix;
pub mod progress;

pub use bitmap::{pack_row, unpack_row, Component, PixelFormat};
pub use clip_stack::{ClipBounds, ClipEntryKind, ClipStack};
pub use color::Color;
pub use debug::DebugFlags;
pub use error::{CoreError, Result};
pub use matrix::{Matrix, MatrixStack};
pub use progress::{has_progress_func, register_progress_func, run_progress_func, ProgressFn};
