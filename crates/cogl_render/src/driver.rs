//! Driver seam
//!
//! Everything that would touch a real graphics API goes through [`Driver`].
//! The engine decides *what* to flush and draw; a driver decides how.
//! [`RecordingDriver`] keeps a log of every call, which is what the demo
//! and the tests draw with.

use crate::attribute::{Attribute, AttributeType, VerticesMode};
use crate::backend::Backend;
use crate::buffer::Buffer;
use crate::indices::{Indices, IndicesType};
use crate::pipeline::{PipelineId, PipelineStore};
use crate::texture::gl_name_of;
use bitflags::bitflags;
use cogl_core::{ClipBounds, ClipStack, Color, Matrix};
use smallvec::SmallVec;

bitflags! {
    /// Framebuffer state a draw may need flushed first
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FramebufferState: u32 {
        const BIND = 1 << 0;
        const VIEWPORT = 1 << 1;
        const CLIP = 1 << 2;
        const DITHER = 1 << 3;
        const MODELVIEW = 1 << 4;
        const PROJECTION = 1 << 5;
        const COLOR_MASK = 1 << 6;
        const FRONT_FACE = 1 << 7;
        const DEPTH_WRITE = 1 << 8;
    }
}

/// Backend for the engine's state flushes and draws
pub trait Driver {
    fn flush_framebuffer_state(&mut self, state: FramebufferState);

    fn flush_clip_stack(&mut self, clip: Option<&ClipStack>);

    fn flush_modelview(&mut self, matrix: &Matrix);

    fn flush_projection(&mut self, matrix: &Matrix);

    /// Make `pipeline` current using `backend`
    fn flush_pipeline(&mut self, store: &PipelineStore, pipeline: PipelineId, backend: Backend);

    fn draw_arrays(&mut self, mode: VerticesMode, first: usize, count: usize, attributes: &[Attribute]);

    fn draw_elements(
        &mut self,
        mode: VerticesMode,
        first: usize,
        count: usize,
        indices: &Indices,
        attributes: &[Attribute],
    );
}

/// Attribute as seen by a recorded draw
#[derive(Clone, Debug)]
pub struct RecordedAttribute {
    pub name: String,
    pub buffer: Buffer,
    pub stride: usize,
    pub offset: usize,
    pub n_components: u32,
    pub attribute_type: AttributeType,
    pub normalized: bool,
}

impl RecordedAttribute {
    fn new(attribute: &Attribute) -> Self {
        Self {
            name: attribute.name().to_string(),
            buffer: attribute.buffer().clone(),
            stride: attribute.stride(),
            offset: attribute.offset(),
            n_components: attribute.n_components(),
            attribute_type: attribute.attribute_type(),
            normalized: attribute.normalized(),
        }
    }

    fn component_bytes(&self, vertex: usize) -> Option<Vec<u8>> {
        let start = self.offset + vertex * self.stride;
        let len = self.n_components as usize * self.attribute_type.size();
        let data = self.buffer.contents();
        data.get(start..start + len).map(<[u8]>::to_vec)
    }

    /// Float components of `vertex`
    pub fn read_floats(&self, vertex: usize) -> Option<SmallVec<[f32; 4]>> {
        if self.attribute_type != AttributeType::Float {
            return None;
        }
        let bytes = self.component_bytes(vertex)?;
        Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        )
    }

    /// Byte components of `vertex`
    pub fn read_bytes(&self, vertex: usize) -> Option<SmallVec<[u8; 4]>> {
        if self.attribute_type != AttributeType::UnsignedByte {
            return None;
        }
        Some(self.component_bytes(vertex)?.into_iter().collect())
    }
}

/// Summary of a flushed pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedPipeline {
    pub pipeline: PipelineId,
    pub age: u64,
    pub backend: Backend,
    pub color: Color,
    pub real_blend_enable: bool,
    /// Texture name per layer, 0 for an empty layer
    pub textures: SmallVec<[u32; 4]>,
    pub depth_test_enabled: bool,
    pub fog_enabled: bool,
}

/// One driver call
#[derive(Clone, Debug)]
pub enum DriverCall {
    FlushFramebuffer(FramebufferState),
    FlushClip {
        depth: usize,
        bounds: Option<ClipBounds>,
    },
    FlushModelview(Matrix),
    FlushProjection(Matrix),
    FlushPipeline(RecordedPipeline),
    DrawArrays {
        mode: VerticesMode,
        first: usize,
        count: usize,
        attributes: Vec<RecordedAttribute>,
    },
    DrawElements {
        mode: VerticesMode,
        first: usize,
        count: usize,
        indices_type: IndicesType,
        attributes: Vec<RecordedAttribute>,
    },
}

impl DriverCall {
    pub fn is_draw(&self) -> bool {
        matches!(self, DriverCall::DrawArrays { .. } | DriverCall::DrawElements { .. })
    }

    /// Mode, first and count of a draw call
    pub fn draw_range(&self) -> Option<(VerticesMode, usize, usize)> {
        match self {
            DriverCall::DrawArrays { mode, first, count, .. }
            | DriverCall::DrawElements { mode, first, count, .. } => Some((*mode, *first, *count)),
            _ => None,
        }
    }

    pub fn attributes(&self) -> &[RecordedAttribute] {
        match self {
            DriverCall::DrawArrays { attributes, .. } | DriverCall::DrawElements { attributes, .. } => attributes,
            _ => &[],
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&RecordedAttribute> {
        self.attributes().iter().find(|a| a.name == name)
    }
}

/// Driver that records every call
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Vec<DriverCall>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DriverCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DriverCall> {
        self.calls.iter().filter(|c| c.is_draw())
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    pub fn pipeline_flushes(&self) -> impl Iterator<Item = &RecordedPipeline> {
        self.calls.iter().filter_map(|c| match c {
            DriverCall::FlushPipeline(p) => Some(p),
            _ => None,
        })
    }

    pub fn pipeline_flush_count(&self) -> usize {
        self.pipeline_flushes().count()
    }

    pub fn clip_flush_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, DriverCall::FlushClip { .. }))
            .count()
    }

    pub fn modelview_flushes(&self) -> impl Iterator<Item = &Matrix> {
        self.calls.iter().filter_map(|c| match c {
            DriverCall::FlushModelview(m) => Some(m),
            _ => None,
        })
    }
}

impl Driver for RecordingDriver {
    fn flush_framebuffer_state(&mut self, state: FramebufferState) {
        self.calls.push(DriverCall::FlushFramebuffer(state));
    }

    fn flush_clip_stack(&mut self, clip: Option<&ClipStack>) {
        self.calls.push(DriverCall::FlushClip {
            depth: clip.map_or(0, ClipStack::depth),
            bounds: clip.map(ClipStack::bounds),
        });
    }

    fn flush_modelview(&mut self, matrix: &Matrix) {
        self.calls.push(DriverCall::FlushModelview(*matrix));
    }

    fn flush_projection(&mut self, matrix: &Matrix) {
        self.calls.push(DriverCall::FlushProjection(*matrix));
    }

    fn flush_pipeline(&mut self, store: &PipelineStore, pipeline: PipelineId, backend: Backend) {
        let textures = store
            .layer_indices(pipeline)
            .into_iter()
            .map(|index| gl_name_of(store.layer_texture(pipeline, index).as_ref()))
            .collect();
        self.calls.push(DriverCall::FlushPipeline(RecordedPipeline {
            pipeline,
            age: store.age(pipeline),
            backend,
            color: store.color(pipeline),
            real_blend_enable: store.real_blend_enable(pipeline),
            textures,
            depth_test_enabled: store.depth_state(pipeline).test_enabled,
            fog_enabled: store.fog_state(pipeline).enabled,
        }));
    }

    fn draw_arrays(&mut self, mode: VerticesMode, first: usize, count: usize, attributes: &[Attribute]) {
        self.calls.push(DriverCall::DrawArrays {
            mode,
            first,
            count,
            attributes: attributes.iter().map(RecordedAttribute::new).collect(),
        });
    }

    fn draw_elements(
        &mut self,
        mode: VerticesMode,
        first: usize,
        count: usize,
        indices: &Indices,
        attributes: &[Attribute],
    ) {
        self.calls.push(DriverCall::DrawElements {
            mode,
            first,
            count,
            indices_type: indices.indices_type(),
            attributes: attributes.iter().map(RecordedAttribute::new).collect(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_draw_attributes() {
        let buffer = Buffer::new_attribute(32);
        let values: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        buffer.set_data(0, bytemuck::cast_slice(&values)).unwrap();
        let position = Attribute::new(&buffer, "cogl_position_in", 8, 0, 2, AttributeType::Float).unwrap();

        let mut driver = RecordingDriver::new();
        driver.draw_arrays(VerticesMode::TriangleFan, 0, 2, &[position]);
        assert_eq!(driver.draw_count(), 1);

        let call = &driver.calls()[0];
        assert_eq!(call.draw_range(), Some((VerticesMode::TriangleFan, 0, 2)));
        let attribute = call.attribute("cogl_position_in").unwrap();
        assert_eq!(attribute.read_floats(1).unwrap().as_slice(), &[3.0, 4.0]);
        assert!(attribute.read_bytes(0).is_none());
    }

    #[test]
    fn test_records_pipeline_summary() {
        let mut store = PipelineStore::new();
        let p = store.new_pipeline();
        store.set_color(p, Color::RED);
        store.ensure_layer(p, 0);

        let mut driver = RecordingDriver::new();
        driver.flush_pipeline(&store, p, Backend::Glsl);
        driver.flush_clip_stack(None);
        let flushed: Vec<_> = driver.pipeline_flushes().collect();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].color, Color::RED);
        assert_eq!(flushed[0].textures.as_slice(), &[0]);
        assert_eq!(driver.clip_flush_count(), 1);

        driver.clear();
        assert!(driver.calls().is_empty());
    }
}
