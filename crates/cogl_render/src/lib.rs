//! Cogl Render
//!
//! Batched rectangle rendering over a copy-on-write pipeline state graph:
//!
//! - **Pipelines**: sparse state nodes that inherit from their parents
//! - **Journal**: deferred quads drawn in as few driver calls as possible
//! - **Attributes**: named vertex attributes over shared buffers
//! - **Drivers**: the seam to a graphics API, with a recording driver
//!
//! # Example
//!
//! ```rust
//! use cogl_core::Color;
//! use cogl_render::{Context, ContextConfig};
//!
//! let mut ctx = Context::new(ContextConfig::default());
//! let red = ctx.new_pipeline();
//! ctx.pipelines_mut().set_color(red, Color::RED);
//! ctx.push_source(red).unwrap();
//!
//! for i in 0..10 {
//!     let x = i as f32 * 10.0;
//!     ctx.rectangle(x, 0.0, x + 8.0, 8.0);
//! }
//! ctx.flush();
//!
//! // Same pipeline, same clip: one draw
//! assert_eq!(ctx.driver().draw_count(), 1);
//! ```

pub mod attribute;
pub mod backend;
pub mod buffer;
pub mod context;
pub mod draw;
pub mod driver;
pub mod error;
pub mod indices;
pub mod journal;
pub mod pipeline;
pub mod texture;

pub use attribute::{Attribute, AttributeNameId, AttributeType, DrawFlags, VerticesMode};
pub use backend::Backend;
pub use buffer::{Buffer, BufferAccess, BufferKind, BufferTarget, UpdateHint};
pub use context::{Context, ContextConfig};
pub use draw::Renderer;
pub use driver::{Driver, DriverCall, FramebufferState, RecordedAttribute, RecordedPipeline, RecordingDriver};
pub use error::{RenderError, Result};
pub use indices::{Indices, IndicesType, RectangleIndices};
pub use journal::{stride_for_layers, Journal, JournalEntry};
pub use pipeline::{FlushOptions, PipelineId, PipelineState, PipelineStore};
pub use texture::{Texture, TextureTarget};
