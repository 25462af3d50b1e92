//! Rendering context
//!
//! [`Context`] ties the journal to the renderer below it. Rectangles go
//! into the journal; arbitrary geometry drawn with
//! [`Context::draw_attributes`] flushes the journal first so everything
//! reaches the driver in submission order.

use crate::attribute::{Attribute, DrawFlags, VerticesMode};
use crate::backend::Backend;
use crate::draw::Renderer;
use crate::driver::{Driver, RecordingDriver};
use crate::error::{RenderError, Result};
use crate::indices::Indices;
use crate::journal::Journal;
use crate::pipeline::{FlushOptions, FogState, PipelineId, PipelineState, PipelineStore};
use cogl_core::debug::{self, DebugFlags};
use cogl_core::{ClipStack, Color, Matrix};
use smallvec::SmallVec;

/// Configuration for creating a context
#[derive(Clone, Debug)]
pub struct ContextConfig {
    /// Pipeline backends in order of preference
    pub backends: SmallVec<[Backend; 3]>,
    /// Transform quad positions on the CPU when they are logged so quads
    /// under different modelviews can share a draw
    ///
    /// The `DISABLE_SOFTWARE_TRANSFORM` debug flag overrides this.
    pub software_transform: bool,
    /// Clip batches shorter than this are clipped on the CPU
    pub hardware_clip_threshold: usize,
    /// Number of vertex buffers the journal cycles through
    pub vbo_pool_size: usize,
    /// Vertex words reserved up front for the journal
    pub initial_vertex_capacity: usize,
    /// Texture units available to a draw; layers beyond are dropped
    pub max_texture_units: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backends: Backend::DEFAULT_PREFERENCE.into_iter().collect(),
            software_transform: true,
            hardware_clip_threshold: 8,
            vbo_pool_size: 8,
            initial_vertex_capacity: 4096,
            max_texture_units: 8,
        }
    }
}

/// Journal, pipelines and draw state for one driver
pub struct Context<D: Driver = RecordingDriver> {
    config: ContextConfig,
    journal: Journal,
    renderer: Renderer<D>,
    /// Source used when nothing is pushed
    default_source: PipelineId,
    source_stack: Vec<PipelineId>,
}

impl Context<RecordingDriver> {
    /// Context drawing into a [`RecordingDriver`]
    pub fn new(config: ContextConfig) -> Self {
        Self::with_driver(RecordingDriver::new(), config)
    }
}

impl<D: Driver> Context<D> {
    pub fn with_driver(driver: D, config: ContextConfig) -> Self {
        let mut renderer = Renderer::new(driver, &config.backends, config.max_texture_units);
        let default_source = renderer.pipelines.new_pipeline();
        let journal = Journal::new(
            config.software_transform,
            config.hardware_clip_threshold,
            config.vbo_pool_size,
            config.initial_vertex_capacity,
        );
        tracing::debug!(
            "context created: backends {:?}, software transform {}",
            config.backends,
            config.software_transform
        );
        Self {
            config,
            journal,
            renderer,
            default_source,
            source_stack: Vec::new(),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn pipelines(&self) -> &PipelineStore {
        &self.renderer.pipelines
    }

    /// Mutable access to the pipeline store
    ///
    /// Logged quads are drawn first so no later change can show through
    /// to them. [`Context::set_pipeline_color`] changes a color without
    /// breaking the current batch.
    pub fn pipelines_mut(&mut self) -> &mut PipelineStore {
        if !self.journal.is_empty() {
            if debug::enabled(DebugFlags::JOURNAL) {
                tracing::trace!("flushing {} quads before pipeline access", self.journal.len());
            }
            self.flush();
        }
        &mut self.renderer.pipelines
    }

    pub fn driver(&self) -> &D {
        &self.renderer.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.renderer.driver
    }

    pub fn renderer(&self) -> &Renderer<D> {
        &self.renderer
    }

    // --- pipelines ---

    pub fn new_pipeline(&mut self) -> PipelineId {
        self.renderer.pipelines.new_pipeline()
    }

    /// Change the color of `p`. Logged quads carry their color in the
    /// vertices so they are only flushed when blending would change.
    pub fn set_pipeline_color(&mut self, p: PipelineId, color: Color) {
        if self
            .renderer
            .pipelines
            .needs_journal_flush(p, PipelineState::COLOR, Some(color))
        {
            self.flush();
        }
        self.renderer.pipelines.set_color(p, color);
    }

    // --- source ---

    /// Pipeline used by rectangles and attribute draws
    pub fn source(&self) -> PipelineId {
        self.source_stack.last().copied().unwrap_or(self.default_source)
    }

    pub fn push_source(&mut self, p: PipelineId) -> Result<()> {
        if !self.renderer.pipelines.is_live(p) {
            tracing::warn!("push_source with a freed pipeline handle {:?}", p);
            return Err(RenderError::StalePipeline);
        }
        self.renderer.pipelines.retain(p);
        self.source_stack.push(p);
        Ok(())
    }

    pub fn pop_source(&mut self) {
        match self.source_stack.pop() {
            Some(p) => {
                self.renderer.pipelines.release(p);
            }
            None => tracing::warn!("pop_source with no pushed source"),
        }
    }

    /// Replace the current source, or push one if only the default
    /// source is current
    pub fn set_source(&mut self, p: PipelineId) -> Result<()> {
        let replaced = self.source_stack.pop();
        let pushed = self.push_source(p);
        match (replaced, pushed.is_ok()) {
            (Some(old), true) => {
                self.renderer.pipelines.release(old);
            }
            (Some(old), false) => self.source_stack.push(old),
            (None, _) => {}
        }
        pushed
    }

    // --- journal ---

    /// Log a quad with explicit pipeline, layer count and overrides
    pub fn log_quad(
        &mut self,
        position: [f32; 4],
        pipeline: PipelineId,
        n_layers: usize,
        options: &FlushOptions,
        tex_coords: &[f32],
    ) {
        let clip = self.renderer.clip.clone();
        self.journal.log_quad(
            &mut self.renderer,
            position,
            pipeline,
            n_layers,
            options,
            tex_coords,
            clip.as_ref(),
        );
    }

    /// Log a rectangle drawn with the current source
    pub fn rectangle(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        self.textured_rectangle([x0, y0, x1, y1], &[]);
    }

    /// Log a rectangle with texture coordinates `s0, t0, s1, t1` per layer,
    /// normalized over each layer's texture. Missing layers get the whole
    /// texture.
    pub fn textured_rectangle(&mut self, position: [f32; 4], tex_coords: &[f32]) {
        let source = self.source();
        let n_layers = self.renderer.pipelines.layer_count(source);
        let tex_coords = self.gl_tex_coords(source, tex_coords);
        self.log_quad(position, source, n_layers, &FlushOptions::default(), &tex_coords);
    }

    /// Per layer coordinates of `p` mapped into the space each texture's
    /// storage is sampled in
    fn gl_tex_coords(&self, p: PipelineId, tex_coords: &[f32]) -> SmallVec<[f32; 16]> {
        let store = &self.renderer.pipelines;
        let mut out = SmallVec::new();
        for (layer, index) in store.layer_indices(p).into_iter().enumerate() {
            let tc = |i: usize| {
                tex_coords
                    .get(layer * 4 + i)
                    .copied()
                    .unwrap_or(if i < 2 { 0.0 } else { 1.0 })
            };
            let (mut s0, mut t0, mut s1, mut t1) = (tc(0), tc(1), tc(2), tc(3));
            if let Some(texture) = store.layer_texture(p, index) {
                (s0, t0) = texture.transform_coords_to_gl(s0, t0);
                (s1, t1) = texture.transform_coords_to_gl(s1, t1);
            }
            out.extend_from_slice(&[s0, t0, s1, t1]);
        }
        out
    }

    pub fn flush(&mut self) {
        self.journal.flush(&mut self.renderer);
    }

    /// Drop logged quads without drawing them
    pub fn discard(&mut self) {
        self.journal.discard(&mut self.renderer.pipelines);
    }

    pub fn all_entries_within_bounds(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> bool {
        self.journal.all_entries_within_bounds(x0, y0, x1, y1)
    }

    // --- attribute draws ---

    /// Draw `n_vertices` vertices from `first_vertex` with the current
    /// source
    pub fn draw_attributes(
        &mut self,
        mode: VerticesMode,
        first_vertex: usize,
        n_vertices: usize,
        attributes: &[Attribute],
        flags: DrawFlags,
    ) {
        self.draw_inner(mode, first_vertex, n_vertices, None, attributes, flags);
    }

    /// Draw `n_vertices` indices from `first_vertex` with the current
    /// source
    pub fn draw_indexed_attributes(
        &mut self,
        mode: VerticesMode,
        first_vertex: usize,
        n_vertices: usize,
        indices: &Indices,
        attributes: &[Attribute],
        flags: DrawFlags,
    ) {
        self.draw_inner(mode, first_vertex, n_vertices, Some(indices), attributes, flags);
    }

    fn draw_inner(
        &mut self,
        mode: VerticesMode,
        first_vertex: usize,
        n_vertices: usize,
        indices: Option<&Indices>,
        attributes: &[Attribute],
        flags: DrawFlags,
    ) {
        if !flags.contains(DrawFlags::SKIP_JOURNAL_FLUSH) {
            self.flush();
        }
        let source = self.source();
        self.renderer
            .draw(source, mode, first_vertex, n_vertices, indices, attributes, flags);
    }

    // --- clipping ---

    /// Clip to a rectangle in the current modelview
    pub fn push_clip_rectangle(&mut self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let modelview = self.renderer.modelview.get();
        let clip = ClipStack::push_rectangle(self.renderer.clip.as_ref(), x0, y0, x1, y1, &modelview);
        self.renderer.clip = Some(clip);
    }

    /// Clip to a rectangle in window coordinates
    pub fn push_clip_window_rectangle(&mut self, x: i32, y: i32, width: i32, height: i32) {
        let clip = ClipStack::push_window_rectangle(self.renderer.clip.as_ref(), x, y, width, height);
        self.renderer.clip = Some(clip);
    }

    pub fn pop_clip(&mut self) {
        match self.renderer.clip.take() {
            Some(clip) => self.renderer.clip = clip.pop(),
            None => tracing::warn!("pop_clip with an empty clip stack"),
        }
    }

    pub fn clip_stack(&self) -> Option<&ClipStack> {
        self.renderer.clip.as_ref()
    }

    // --- matrices ---

    pub fn modelview(&self) -> Matrix {
        self.renderer.modelview.get()
    }

    pub fn push_matrix(&mut self) {
        self.renderer.modelview.push();
    }

    pub fn pop_matrix(&mut self) -> Result<()> {
        self.renderer.modelview.pop()?;
        Ok(())
    }

    pub fn translate(&mut self, x: f32, y: f32, z: f32) {
        self.renderer.modelview.translate(x, y, z);
    }

    pub fn scale(&mut self, x: f32, y: f32, z: f32) {
        self.renderer.modelview.scale(x, y, z);
    }

    pub fn rotate(&mut self, degrees: f32, x: f32, y: f32, z: f32) {
        self.renderer.modelview.rotate(degrees, x, y, z);
    }

    pub fn set_modelview(&mut self, matrix: &Matrix) {
        self.renderer.modelview.set(matrix);
    }

    pub fn projection(&self) -> Matrix {
        self.renderer.projection.get()
    }

    /// Logged quads are drawn with the projection current at flush time,
    /// so they are flushed first
    pub fn set_projection(&mut self, matrix: &Matrix) {
        self.flush();
        self.renderer.projection.set(matrix);
    }

    // --- legacy state ---

    pub fn set_depth_test_enabled(&mut self, enabled: bool) {
        self.renderer.legacy.depth_test_enabled = enabled;
    }

    pub fn depth_test_enabled(&self) -> bool {
        self.renderer.legacy.depth_test_enabled
    }

    /// Fog applied over every pipeline; `None` disables it
    pub fn set_fog(&mut self, fog: Option<FogState>) {
        self.renderer.legacy.fog = match fog {
            Some(fog) => FogState { enabled: true, ..fog },
            None => FogState::default(),
        };
    }

    /// Forget cached driver state after something else used the driver
    pub fn invalidate_flush_caches(&mut self) {
        self.renderer.invalidate_flush_caches();
    }
}

impl<D: Driver> Drop for Context<D> {
    fn drop(&mut self) {
        if !self.journal.is_empty() {
            tracing::debug!("context dropped with {} unflushed quads", self.journal.len());
            self.journal.discard(&mut self.renderer.pipelines);
        }
        for p in self.source_stack.drain(..) {
            self.renderer.pipelines.release(p);
        }
    }
}

impl<D: Driver> std::fmt::Debug for Context<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("journal_len", &self.journal.len())
            .field("source", &self.source())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeType;
    use crate::buffer::Buffer;
    use crate::journal::stride_for_layers;
    use crate::texture::Texture;
    use cogl_core::PixelFormat;

    #[test]
    fn test_rectangles_batch_into_one_draw() {
        let mut ctx = Context::new(ContextConfig::default());
        for i in 0..5 {
            ctx.rectangle(i as f32, 0.0, i as f32 + 1.0, 1.0);
        }
        assert_eq!(ctx.driver().draw_count(), 0);
        ctx.flush();
        assert_eq!(ctx.driver().draw_count(), 1);
    }

    #[test]
    fn test_attribute_draw_flushes_journal_first() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);

        let buffer = Buffer::new_attribute(24);
        let position = Attribute::new(&buffer, "cogl_position_in", 8, 0, 2, AttributeType::Float).unwrap();
        ctx.draw_attributes(VerticesMode::Triangles, 0, 3, &[position], DrawFlags::empty());

        assert!(ctx.journal().is_empty());
        let draws: Vec<_> = ctx.driver().draws().collect();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].draw_range(), Some((VerticesMode::TriangleFan, 0, 4)));
        assert_eq!(draws[1].draw_range(), Some((VerticesMode::Triangles, 0, 3)));
    }

    #[test]
    fn test_skip_journal_flush_leaves_quads() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        let buffer = Buffer::new_attribute(24);
        let position = Attribute::new(&buffer, "cogl_position_in", 8, 0, 2, AttributeType::Float).unwrap();
        ctx.draw_attributes(VerticesMode::Triangles, 0, 3, &[position], DrawFlags::SKIP_JOURNAL_FLUSH);
        assert_eq!(ctx.journal().len(), 1);
        assert_eq!(ctx.driver().draw_count(), 1);
    }

    #[test]
    fn test_source_stack() {
        let mut ctx = Context::new(ContextConfig::default());
        let default = ctx.source();
        let p = ctx.new_pipeline();
        ctx.push_source(p).unwrap();
        assert_eq!(ctx.source(), p);
        assert_eq!(ctx.pipelines().ref_count(p), 2);

        let q = ctx.new_pipeline();
        ctx.set_source(q).unwrap();
        assert_eq!(ctx.source(), q);
        assert_eq!(ctx.pipelines().ref_count(p), 1);

        ctx.pop_source();
        ctx.pop_source();
        assert_eq!(ctx.source(), default);
    }

    #[test]
    fn test_set_source_keeps_default() {
        let mut ctx = Context::new(ContextConfig::default());
        let default = ctx.source();
        let p = ctx.new_pipeline();
        ctx.set_source(p).unwrap();
        assert_eq!(ctx.source(), p);
        ctx.pop_source();
        assert_eq!(ctx.source(), default);
    }

    #[test]
    fn test_push_freed_source_fails() {
        let mut ctx = Context::new(ContextConfig::default());
        let p = ctx.new_pipeline();
        ctx.pipelines_mut().release(p);
        assert_eq!(ctx.push_source(p), Err(RenderError::StalePipeline));
    }

    #[test]
    fn test_color_change_keeps_batch_when_blending_unchanged() {
        let mut ctx = Context::new(ContextConfig::default());
        let p = ctx.new_pipeline();
        ctx.push_source(p).unwrap();
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        ctx.set_pipeline_color(p, Color::RED);
        assert_eq!(ctx.journal().len(), 1);

        ctx.set_pipeline_color(p, Color::RED.with_alpha(0x80));
        assert!(ctx.journal().is_empty());
        assert_eq!(ctx.driver().draw_count(), 1);
    }

    #[test]
    fn test_pipeline_access_flushes_logged_quads() {
        let mut ctx = Context::new(ContextConfig::default());
        let a = Texture::new_2d(8, 8, PixelFormat::Rgb888);
        let b = Texture::new_2d(8, 8, PixelFormat::Rgb888);
        let p = ctx.new_pipeline();
        ctx.pipelines_mut().set_layer_texture(p, 0, Some(a.clone()));
        ctx.push_source(p).unwrap();
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);

        ctx.pipelines_mut().set_layer_texture(p, 0, Some(b.clone()));
        assert!(ctx.journal().is_empty());
        assert_eq!(ctx.driver().draw_count(), 1);
        let textures: Vec<_> = ctx.driver().pipeline_flushes().map(|f| f.textures[0]).collect();
        assert_eq!(textures, vec![a.gl_name()]);

        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        ctx.flush();
        let last = ctx.driver().pipeline_flushes().last().map(|f| f.textures[0]);
        assert_eq!(last, Some(b.gl_name()));
    }

    #[test]
    fn test_atlas_region_coords_are_logged_in_atlas_space() {
        let mut ctx = Context::new(ContextConfig::default());
        let atlas = Texture::new_2d(256, 256, PixelFormat::Rgba8888Pre);
        let region = Texture::new_atlas_region(&atlas, 128, 128, 64, 64);
        let p = ctx.new_pipeline();
        ctx.pipelines_mut().set_layer_texture(p, 0, Some(region));
        ctx.push_source(p).unwrap();
        ctx.textured_rectangle([0.0, 0.0, 1.0, 1.0], &[0.0, 0.0, 1.0, 1.0]);

        let stride = stride_for_layers(1, true);
        let tex = |ctx: &Context, v: usize| {
            let at = v * stride + 4;
            [ctx.journal().vertices()[at], ctx.journal().vertices()[at + 1]]
        };
        assert_eq!(tex(&ctx, 0), [0.5, 0.5]);
        assert_eq!(tex(&ctx, 2), [0.75, 0.75]);

        // Default coordinates cover the whole region
        ctx.discard();
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        assert_eq!(tex(&ctx, 0), [0.5, 0.5]);
        assert_eq!(tex(&ctx, 2), [0.75, 0.75]);
    }

    #[test]
    fn test_clip_push_pop() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.push_clip_window_rectangle(0, 0, 10, 10);
        ctx.push_clip_rectangle(0.0, 0.0, 5.0, 5.0);
        assert_eq!(ctx.clip_stack().map(ClipStack::depth), Some(2));
        ctx.pop_clip();
        ctx.pop_clip();
        assert!(ctx.clip_stack().is_none());
        ctx.pop_clip();
    }

    #[test]
    fn test_pop_matrix_underflow_is_error() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.push_matrix();
        ctx.translate(1.0, 0.0, 0.0);
        assert!(ctx.pop_matrix().is_ok());
        assert!(ctx.modelview().is_identity());
        assert!(ctx.pop_matrix().is_err());
    }

    #[test]
    fn test_legacy_depth_test_reaches_driver() {
        let mut ctx = Context::new(ContextConfig::default());
        ctx.set_depth_test_enabled(true);
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        ctx.flush();
        let flushed: Vec<_> = ctx.driver().pipeline_flushes().collect();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].depth_test_enabled);
        assert!(!ctx.pipelines().depth_state(ctx.source()).test_enabled);
    }
}
