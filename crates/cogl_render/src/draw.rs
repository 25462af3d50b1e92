//! Draw path shared by the journal and direct attribute draws
//!
//! [`Renderer`] owns everything a draw touches: the pipeline store, the
//! driver, the matrix stacks, the current clip stack and the flush caches
//! that keep redundant state away from the driver. Every draw resolves a
//! private copy of the source pipeline when it needs one (layer fallbacks,
//! a translucent color attribute, legacy state) and releases it afterwards.

use crate::attribute::{Attribute, AttributeNameId, DrawFlags, VerticesMode};
use crate::backend::Backend;
use crate::buffer::{BufferBindings, BufferTarget};
use crate::driver::{Driver, FramebufferState};
use crate::error::WarnOnce;
use crate::indices::{Indices, RectangleIndices};
use crate::pipeline::{BlendEnable, FallbackTextures, FlushOptions, LegacyState, PipelineId, PipelineStore};
use cogl_core::{ClipStack, MatrixStack};
use smallvec::SmallVec;

/// Engine state below the journal
pub struct Renderer<D: Driver> {
    pub(crate) pipelines: PipelineStore,
    pub(crate) driver: D,
    pub(crate) modelview: MatrixStack,
    pub(crate) projection: MatrixStack,
    /// Clip state of the framebuffer being drawn to
    pub(crate) clip: Option<ClipStack>,
    pub(crate) legacy: LegacyState,
    pub(crate) rectangle_indices: RectangleIndices,
    pub(crate) bindings: BufferBindings,
    pub(crate) fallback: FallbackTextures,
    backends: SmallVec<[Backend; 3]>,
    max_texture_units: usize,
    /// Pipeline and age last handed to the driver
    flushed_pipeline: Option<(PipelineId, u64)>,
    /// Clip stack last handed to the driver; outer `None` means nothing
    /// flushed yet
    flushed_clip: Option<Option<ClipStack>>,
    warned: WarnOnce,
}

impl<D: Driver> Renderer<D> {
    pub fn new(driver: D, backends: &[Backend], max_texture_units: usize) -> Self {
        Self {
            pipelines: PipelineStore::new(),
            driver,
            modelview: MatrixStack::new(),
            projection: MatrixStack::new(),
            clip: None,
            legacy: LegacyState::default(),
            rectangle_indices: RectangleIndices::new(),
            bindings: BufferBindings::default(),
            fallback: FallbackTextures::new(),
            backends: backends.iter().copied().collect(),
            max_texture_units: max_texture_units.max(1),
            flushed_pipeline: None,
            flushed_clip: None,
            warned: WarnOnce::default(),
        }
    }

    pub fn pipelines(&self) -> &PipelineStore {
        &self.pipelines
    }

    pub fn pipelines_mut(&mut self) -> &mut PipelineStore {
        &mut self.pipelines
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    // --- state flushing ---

    pub(crate) fn flush_framebuffer_state(&mut self, state: FramebufferState) {
        self.driver.flush_framebuffer_state(state);
        if state.contains(FramebufferState::CLIP) {
            let clip = self.clip.clone();
            self.flush_clip(clip.as_ref());
        }
        if state.contains(FramebufferState::MODELVIEW) {
            self.flush_modelview();
        }
        if state.contains(FramebufferState::PROJECTION) {
            self.flush_projection();
        }
    }

    pub(crate) fn flush_clip(&mut self, clip: Option<&ClipStack>) {
        if let Some(flushed) = &self.flushed_clip {
            if ClipStack::ptr_eq(flushed.as_ref(), clip) {
                return;
            }
        }
        self.driver.flush_clip_stack(clip);
        self.flushed_clip = Some(clip.cloned());
    }

    pub(crate) fn flush_modelview(&mut self) {
        if self.modelview.needs_flush() {
            self.driver.flush_modelview(&self.modelview.get());
            self.modelview.mark_flushed();
        }
    }

    pub(crate) fn flush_projection(&mut self) {
        if self.projection.needs_flush() {
            self.driver.flush_projection(&self.projection.get());
            self.projection.mark_flushed();
        }
    }

    /// Forget every cached flush, e.g. after something else used the driver
    pub fn invalidate_flush_caches(&mut self) {
        self.flushed_pipeline = None;
        self.flushed_clip = None;
        self.modelview.dirty();
        self.projection.dirty();
    }

    fn flush_pipeline(&mut self, pipeline: PipelineId) {
        let backend = self.pipelines.resolve_backend(pipeline, &self.backends);
        let key = (pipeline, self.pipelines.age(pipeline));
        if self.flushed_pipeline == Some(key) {
            return;
        }
        self.driver.flush_pipeline(&self.pipelines, pipeline, backend);
        self.flushed_pipeline = Some(key);
    }

    // --- validation ---

    /// Layers of `pipeline` that can't be drawn with arbitrary geometry
    fn validate_layers(&mut self, pipeline: PipelineId) -> FlushOptions {
        let mut options = FlushOptions::default();
        for (position, index) in self.pipelines.layer_indices(pipeline).into_iter().enumerate() {
            if position >= u32::BITS as usize {
                break;
            }
            if position >= self.max_texture_units {
                if self.warned.first("max-texture-units") {
                    tracing::warn!(
                        "Only {} texture units are available, disabling layers from layer {} on",
                        self.max_texture_units,
                        index
                    );
                }
                options.disable_layers |= 1 << position;
                break;
            }
            let Some(texture) = self.pipelines.layer_texture(pipeline, index) else {
                continue;
            };
            if !texture.can_hardware_repeat() {
                if self.warned.first(format!("disable-layer-{index}")) {
                    tracing::warn!(
                        "Disabling layer {} of the current source pipeline, because texturing with \
                         the vertex buffer API is not currently supported using sliced textures, \
                         or textures with waste",
                        index
                    );
                }
                options.fallback_layers |= 1 << position;
            }
        }
        options
    }

    // --- drawing ---

    /// Draw with `pipeline`. Expects the journal to have been flushed
    /// already unless the caller is the journal itself.
    pub(crate) fn draw(
        &mut self,
        pipeline: PipelineId,
        mode: VerticesMode,
        first: usize,
        count: usize,
        indices: Option<&Indices>,
        attributes: &[Attribute],
        flags: DrawFlags,
    ) {
        if !self.pipelines.is_live(pipeline) {
            tracing::warn!("draw with a freed pipeline handle {:?}", pipeline);
            return;
        }

        let options = if flags.contains(DrawFlags::SKIP_PIPELINE_VALIDATION) {
            FlushOptions::default()
        } else {
            self.validate_layers(pipeline)
        };

        if !flags.contains(DrawFlags::SKIP_FRAMEBUFFER_FLUSH) {
            self.flush_framebuffer_state(FramebufferState::all());
        }

        let mut source = pipeline;
        let mut copy: Option<PipelineId> = None;
        let mut derive = |store: &mut PipelineStore, source: &mut PipelineId| {
            if copy.is_none() {
                let new = store.copy(*source);
                copy = Some(new);
                *source = new;
            }
        };

        let has_color = attributes.iter().any(|a| a.name_id() == AttributeNameId::Color);
        if has_color
            && !flags.contains(DrawFlags::COLOR_ATTRIBUTE_IS_OPAQUE)
            && !self.pipelines.real_blend_enable(source)
        {
            derive(&mut self.pipelines, &mut source);
            self.pipelines.set_blend_enable(source, BlendEnable::Enabled);
        }

        if !options.is_empty() {
            derive(&mut self.pipelines, &mut source);
            self.pipelines.apply_overrides(source, &options, &self.fallback);
        }

        if !flags.contains(DrawFlags::SKIP_LEGACY_STATE) && self.legacy.is_active() {
            derive(&mut self.pipelines, &mut source);
            let legacy = self.legacy;
            self.pipelines.apply_legacy_state(source, &legacy);
        }

        self.flush_pipeline(source);

        for attribute in attributes {
            attribute.immutable_ref();
            // Pointers are set up from the bound buffer one at a time
            if self
                .bindings
                .bind(BufferTarget::AttributeBuffer, attribute.buffer())
                .is_ok()
            {
                self.bindings.unbind(BufferTarget::AttributeBuffer);
            }
        }

        match indices {
            Some(indices) => self.driver.draw_elements(mode, first, count, indices, attributes),
            None => self.driver.draw_arrays(mode, first, count, attributes),
        }

        for attribute in attributes {
            attribute.immutable_unref();
        }

        if let Some(copy) = copy {
            if self.flushed_pipeline.is_some_and(|(p, _)| p == copy) {
                self.flushed_pipeline = None;
            }
            self.pipelines.release(copy);
        }
    }
}

impl<D: Driver + std::fmt::Debug> std::fmt::Debug for Renderer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("pipelines", &self.pipelines)
            .field("driver", &self.driver)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}
