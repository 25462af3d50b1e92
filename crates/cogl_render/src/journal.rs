//! Quad journal
//!
//! Rectangles are not drawn when they are submitted. Each one is logged as
//! a [`JournalEntry`] plus four interleaved vertices, and the whole journal
//! is drawn in as few driver calls as possible when it is flushed.
//!
//! # Vertex layout
//!
//! Each vertex is a run of 32-bit words:
//!
//! ```text
//! [x, y, (z)] [rgba as 4 bytes] [s0, t0] [s1, t1] ...
//! ```
//!
//! `z` is only present with software transform, where positions are
//! multiplied by the modelview at log time. Texture coordinates are padded
//! to at least two layers so quads with zero, one or two layers share a
//! stride.
//!
//! # Flushing
//!
//! Entries are split into maximal runs of neighbours that agree on, from
//! the outside in: clip stack identity, vertex stride, layer count,
//! pipeline state and (without software transform) modelview. Each state
//! change is flushed once per run at its level, and each innermost run is
//! one draw call. Entries are never reordered.

use crate::attribute::{Attribute, AttributeType, DrawFlags, VerticesMode};
use crate::buffer::{Buffer, BufferTarget};
use crate::draw::Renderer;
use crate::driver::{Driver, FramebufferState};
use crate::indices::Indices;
use crate::pipeline::{FlushOptions, LayerState, PipelineId, PipelineState, PipelineStore};
use cogl_core::debug::{self, DebugFlags};
use cogl_core::{ClipEntryKind, ClipStack, Color, Matrix};
use smallvec::SmallVec;
use std::ops::Range;

/// Position words per vertex with software transform
const POS_STRIDE_3D: usize = 3;
/// Position words per vertex without software transform
const POS_STRIDE_2D: usize = 2;
const COLOR_STRIDE: usize = 1;
const TEX_STRIDE: usize = 2;
/// Layers of texture coordinates always reserved per vertex
const MIN_LAYER_PADDING: usize = 2;

/// Words per vertex for quads with `n_layers` layers
pub fn stride_for_layers(n_layers: usize, software_transform: bool) -> usize {
    let pos = if software_transform {
        POS_STRIDE_3D
    } else {
        POS_STRIDE_2D
    };
    pos + COLOR_STRIDE + TEX_STRIDE * n_layers.max(MIN_LAYER_PADDING)
}

fn pos_stride(software_transform: bool) -> usize {
    if software_transform {
        POS_STRIDE_3D
    } else {
        POS_STRIDE_2D
    }
}

/// One logged quad
#[derive(Debug)]
pub struct JournalEntry {
    pipeline: PipelineId,
    n_layers: usize,
    clip: Option<ClipStack>,
    /// Modelview at log time; only used without software transform
    modelview: Matrix,
    /// Index of the entry's first vertex word
    array_offset: usize,
}

impl JournalEntry {
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub fn n_layers(&self) -> usize {
        self.n_layers
    }

    pub fn clip(&self) -> Option<&ClipStack> {
        self.clip.as_ref()
    }
}

/// Deferred quads awaiting a batched flush
#[derive(Debug)]
pub struct Journal {
    entries: Vec<JournalEntry>,
    vertices: Vec<f32>,
    /// Fixed at the first log after a flush so one flush sees one layout
    software_transform: bool,
    software_transform_default: bool,
    hardware_clip_threshold: usize,
    vbo_pool: Vec<Option<Buffer>>,
    next_vbo: usize,
    /// Cycles through 24 outline colors under the rectangles debug flag
    rectangles_color: u8,
    outline: Option<PipelineId>,
}

/// Per-flush bookkeeping shared by the cascade levels
struct FlushState {
    vbo: Buffer,
    software_transform: bool,
    /// Byte offset of the current stride run in the vertex buffer
    array_offset: usize,
    /// Vertex index of the next quad, relative to `array_offset`
    current_vertex: usize,
    stride_bytes: usize,
    indices: Option<Indices>,
    attributes: SmallVec<[Attribute; 6]>,
}

impl Journal {
    pub fn new(
        software_transform: bool,
        hardware_clip_threshold: usize,
        vbo_pool_size: usize,
        initial_vertex_capacity: usize,
    ) -> Self {
        Self {
            entries: Vec::new(),
            vertices: Vec::with_capacity(initial_vertex_capacity),
            software_transform,
            software_transform_default: software_transform,
            hardware_clip_threshold,
            vbo_pool: vec![None; vbo_pool_size.max(1)],
            next_vbo: 0,
            rectangles_color: 1,
            outline: None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Vertex words logged since the last flush
    pub fn vertices(&self) -> &[f32] {
        &self.vertices
    }

    pub fn vertex_capacity(&self) -> usize {
        self.vertices.capacity()
    }

    /// Whether the entries currently logged hold eye-space positions
    pub fn software_transform(&self) -> bool {
        self.software_transform
    }

    fn current_software_transform(&self) -> bool {
        self.software_transform_default && !debug::enabled(DebugFlags::DISABLE_SOFTWARE_TRANSFORM)
    }

    // --- recording ---

    /// Log a quad covering `position` (`x0, y0, x1, y1`) drawn with
    /// `pipeline`. `tex_coords` holds `s0, t0, s1, t1` for each of the
    /// first `n_layers` layers, already in the space each texture is
    /// sampled in. Missing values default to the unit square.
    #[allow(clippy::too_many_arguments)]
    pub fn log_quad<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        position: [f32; 4],
        pipeline: PipelineId,
        n_layers: usize,
        options: &FlushOptions,
        tex_coords: &[f32],
        clip: Option<&ClipStack>,
    ) {
        if !r.pipelines.is_live(pipeline) {
            tracing::warn!("log_quad with a freed pipeline handle {:?}", pipeline);
            return;
        }

        if self.entries.is_empty() {
            self.software_transform = self.current_software_transform();
            // Modelview and clip are flushed per batch
            r.flush_framebuffer_state(FramebufferState::all() - FramebufferState::MODELVIEW - FramebufferState::CLIP);
        }
        let software_transform = self.software_transform;

        let stride = stride_for_layers(n_layers, software_transform);
        let array_offset = self.vertices.len();
        self.vertices.resize(array_offset + 4 * stride, 0.0);

        let color = r.pipelines.color(pipeline).to_bytes();
        let color_word = f32::from_ne_bytes(color);
        let [x0, y0, x1, y1] = position;
        let corners = [(x0, y0), (x0, y1), (x1, y1), (x1, y0)];
        let modelview = r.modelview.get();
        let pos = pos_stride(software_transform);

        for (v, &(x, y)) in corners.iter().enumerate() {
            let vertex = &mut self.vertices[array_offset + v * stride..array_offset + (v + 1) * stride];
            if software_transform {
                let [tx, ty, tz, _] = modelview.transform_point(x, y, 0.0, 1.0);
                vertex[..3].copy_from_slice(&[tx, ty, tz]);
            } else {
                vertex[..2].copy_from_slice(&[x, y]);
            }
            vertex[pos] = color_word;
        }

        for layer in 0..n_layers {
            let tc = |i: usize| {
                tex_coords
                    .get(layer * 4 + i)
                    .copied()
                    .unwrap_or(if i < 2 { 0.0 } else { 1.0 })
            };
            let (s0, t0, s1, t1) = (tc(0), tc(1), tc(2), tc(3));
            let corner_tex = [(s0, t0), (s0, t1), (s1, t1), (s1, t0)];
            for (v, &(s, t)) in corner_tex.iter().enumerate() {
                let at = array_offset + v * stride + pos + COLOR_STRIDE + TEX_STRIDE * layer;
                self.vertices[at] = s;
                self.vertices[at + 1] = t;
            }
        }

        if debug::enabled(DebugFlags::JOURNAL) {
            tracing::trace!(
                "logged quad {} with {} layers: {:?}",
                self.entries.len(),
                n_layers,
                &self.vertices[array_offset..]
            );
        }

        let source = self.resolve_source(r, pipeline, n_layers, options);
        r.pipelines.journal_ref(source);
        if source != pipeline {
            r.pipelines.release(source);
        }

        self.entries.push(JournalEntry {
            pipeline: source,
            n_layers,
            clip: clip.cloned(),
            modelview,
            array_offset,
        });

        if debug::enabled(DebugFlags::DISABLE_BATCHING) {
            self.flush(r);
        }
    }

    /// The pipeline an entry should hold: `pipeline` itself, or a private
    /// copy with the per-quad overrides applied. The copy comes back with
    /// one reference owned by the caller.
    fn resolve_source<D: Driver>(
        &self,
        r: &mut Renderer<D>,
        pipeline: PipelineId,
        n_layers: usize,
        options: &FlushOptions,
    ) -> PipelineId {
        let mut options = options.clone();
        if r.pipelines.layer_count(pipeline) > n_layers {
            options.disable_layers |= u32::MAX.checked_shl(n_layers as u32).unwrap_or(0);
        }
        let legacy = r.legacy;
        if options.is_empty() && !legacy.is_active() {
            return pipeline;
        }
        let copy = r.pipelines.copy(pipeline);
        if !options.is_empty() {
            r.pipelines.apply_overrides(copy, &options, &r.fallback);
        }
        if legacy.is_active() {
            r.pipelines.apply_legacy_state(copy, &legacy);
        }
        copy
    }

    // --- flushing ---

    /// Draw every logged quad and empty the journal
    pub fn flush<D: Driver>(&mut self, r: &mut Renderer<D>) {
        if self.entries.is_empty() {
            return;
        }
        let software_transform = self.software_transform;
        if debug::enabled(DebugFlags::BATCHING) {
            tracing::debug!("journal flush: {} quads", self.entries.len());
        }

        if software_transform && !debug::enabled(DebugFlags::DISABLE_SOFTWARE_CLIP) {
            for run in batch_runs(&self.entries, same_clip) {
                self.maybe_software_clip_entries(&r.pipelines, run);
            }
        }

        let vbo = self.upload_vertices(r);
        let mut state = FlushState {
            vbo,
            software_transform,
            array_offset: 0,
            current_vertex: 0,
            stride_bytes: 0,
            indices: None,
            attributes: SmallVec::new(),
        };

        for run in batch_runs(&self.entries, same_clip) {
            self.flush_clip_stacks_and_entries(r, &mut state, run);
        }

        for entry in self.entries.drain(..) {
            r.pipelines.journal_unref(entry.pipeline);
        }
        // Capacity is kept for the next frame
        self.vertices.clear();
    }

    /// Drop every logged quad without drawing
    pub fn discard(&mut self, store: &mut PipelineStore) {
        for entry in self.entries.drain(..) {
            store.journal_unref(entry.pipeline);
        }
        self.vertices.clear();
    }

    fn next_vertex_buffer(&mut self, n_bytes: usize) -> Buffer {
        if debug::enabled(DebugFlags::DISABLE_VBOS) {
            return Buffer::new_attribute(n_bytes);
        }
        let slot = &mut self.vbo_pool[self.next_vbo];
        let buffer = match slot {
            Some(buffer) if buffer.size() >= n_bytes => buffer.clone(),
            _ => {
                let buffer = Buffer::new_attribute(n_bytes);
                *slot = Some(buffer.clone());
                buffer
            }
        };
        self.next_vbo = (self.next_vbo + 1) % self.vbo_pool.len();
        buffer
    }

    /// Pooled vertex buffers, for inspection
    pub fn vbo_pool(&self) -> impl Iterator<Item = &Buffer> {
        self.vbo_pool.iter().flatten()
    }

    fn upload_vertices<D: Driver>(&mut self, r: &mut Renderer<D>) -> Buffer {
        let n_bytes = std::mem::size_of_val(self.vertices.as_slice());
        let vbo = self.next_vertex_buffer(n_bytes);

        let bound = r.bindings.bind(BufferTarget::AttributeBuffer, &vbo).is_ok();
        let bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        if let Err(e) = vbo.set_data(0, bytes) {
            tracing::warn!("Failed to upload journal vertices: {}", e);
        }
        if bound {
            r.bindings.unbind(BufferTarget::AttributeBuffer);
        }
        vbo
    }

    fn flush_clip_stacks_and_entries<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        state: &mut FlushState,
        run: Range<usize>,
    ) {
        if debug::enabled(DebugFlags::BATCHING) {
            tracing::debug!("clip stack batch len = {}", run.len());
        }

        let clip = self.entries[run.start].clip.clone();
        r.flush_clip(clip.as_ref());

        r.modelview.push();
        if state.software_transform {
            // Vertices are already in eye space
            r.modelview.load_identity();
            r.flush_modelview();
        }
        r.flush_projection();

        for sub in batch_runs(&self.entries[run.clone()], |a, b| {
            stride_compatible(a.n_layers, b.n_layers)
        }) {
            let sub = offset_range(sub, run.start);
            self.flush_vbo_offsets_and_entries(r, state, sub);
        }

        if r.modelview.pop().is_err() {
            tracing::warn!("journal flush left the modelview stack unbalanced");
        }
    }

    fn flush_vbo_offsets_and_entries<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        state: &mut FlushState,
        run: Range<usize>,
    ) {
        if debug::enabled(DebugFlags::BATCHING) {
            tracing::debug!("vbo offset batch len = {}", run.len());
        }

        let first = &self.entries[run.start];
        let stride = stride_for_layers(first.n_layers, state.software_transform);
        let pos = pos_stride(state.software_transform);
        state.stride_bytes = stride * 4;
        state.attributes.clear();

        if let Ok(position) = Attribute::new(
            &state.vbo,
            "cogl_position_in",
            state.stride_bytes,
            state.array_offset,
            pos as u32,
            AttributeType::Float,
        ) {
            state.attributes.push(position);
        }
        if let Ok(color) = Attribute::new(
            &state.vbo,
            "cogl_color_in",
            state.stride_bytes,
            state.array_offset + pos * 4,
            4,
            AttributeType::UnsignedByte,
        ) {
            state.attributes.push(color);
        }

        state.indices = Some(r.rectangle_indices.get(run.len()));
        state.current_vertex = 0;

        if debug::enabled(DebugFlags::JOURNAL) {
            let start = first.array_offset;
            let end = start + run.len() * 4 * stride;
            tracing::trace!(
                "stride batch of {} quads at byte offset {}: {:?}",
                run.len(),
                state.array_offset,
                &self.vertices[start..end]
            );
        }

        for sub in batch_runs(&self.entries[run.clone()], |a, b| a.n_layers == b.n_layers) {
            let sub = offset_range(sub, run.start);
            self.flush_texcoord_vbo_offsets_and_entries(r, state, sub);
        }

        state.array_offset += state.stride_bytes * 4 * run.len();
    }

    fn flush_texcoord_vbo_offsets_and_entries<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        state: &mut FlushState,
        run: Range<usize>,
    ) {
        // Position and color stay; texture coordinates follow the layer count
        state.attributes.truncate(2);
        let pos = pos_stride(state.software_transform);
        let n_layers = self.entries[run.start].n_layers;
        for layer in 0..n_layers {
            let name = format!("cogl_tex_coord{layer}_in");
            match Attribute::new(
                &state.vbo,
                &name,
                state.stride_bytes,
                state.array_offset + (pos + COLOR_STRIDE) * 4 + TEX_STRIDE * 4 * layer,
                2,
                AttributeType::Float,
            ) {
                Ok(attribute) => state.attributes.push(attribute),
                Err(e) => tracing::warn!("Skipping texture coordinates for layer {}: {}", layer, e),
            }
        }

        for sub in batch_runs(&self.entries[run.clone()], |a, b| {
            same_pipeline_state(&r.pipelines, a.pipeline, b.pipeline)
        }) {
            let sub = offset_range(sub, run.start);
            self.flush_pipeline_and_entries(r, state, sub);
        }
    }

    fn flush_pipeline_and_entries<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        state: &mut FlushState,
        run: Range<usize>,
    ) {
        if debug::enabled(DebugFlags::BATCHING) {
            tracing::debug!("pipeline batch len = {}", run.len());
        }

        if state.software_transform {
            self.flush_modelview_and_entries(r, state, run);
            return;
        }
        for sub in batch_runs(&self.entries[run.clone()], |a, b| a.modelview.bitwise_eq(&b.modelview)) {
            let sub = offset_range(sub, run.start);
            self.flush_modelview_and_entries(r, state, sub);
        }
    }

    fn flush_modelview_and_entries<D: Driver>(
        &mut self,
        r: &mut Renderer<D>,
        state: &mut FlushState,
        run: Range<usize>,
    ) {
        let batch_len = run.len();
        if debug::enabled(DebugFlags::BATCHING) {
            tracing::debug!("modelview batch len = {}", batch_len);
        }

        let first = &self.entries[run.start];
        let pipeline = first.pipeline;
        if !state.software_transform {
            let modelview = first.modelview;
            r.modelview.set(&modelview);
            r.flush_modelview();
        }

        let mut flags = DrawFlags::SKIP_JOURNAL_FLUSH
            | DrawFlags::SKIP_PIPELINE_VALIDATION
            | DrawFlags::SKIP_FRAMEBUFFER_FLUSH
            | DrawFlags::SKIP_LEGACY_STATE;
        if !r.pipelines.real_blend_enable(pipeline) {
            flags |= DrawFlags::COLOR_ATTRIBUTE_IS_OPAQUE;
        }

        if batch_len > 1 {
            match &state.indices {
                Some(indices) => r.draw(
                    pipeline,
                    VerticesMode::Triangles,
                    state.current_vertex * 6 / 4,
                    batch_len * 6,
                    Some(indices),
                    &state.attributes,
                    flags,
                ),
                None => tracing::warn!("journal batch of {} quads without indices", batch_len),
            }
        } else {
            r.draw(
                pipeline,
                VerticesMode::TriangleFan,
                state.current_vertex,
                4,
                None,
                &state.attributes,
                flags,
            );
        }

        if debug::enabled(DebugFlags::RECTANGLES) {
            self.draw_outlines(r, state, batch_len, flags);
        }

        state.current_vertex += 4 * batch_len;
    }

    /// Outline each quad of the batch with a line loop in the next debug
    /// color
    fn draw_outlines<D: Driver>(&mut self, r: &mut Renderer<D>, state: &FlushState, batch_len: usize, flags: DrawFlags) {
        let outline = match self.outline {
            Some(p) if r.pipelines.is_live(p) => p,
            _ => {
                let p = r.pipelines.new_pipeline();
                self.outline = Some(p);
                p
            }
        };

        // Low three bits pick the channels, the next two the intensity
        let index = self.rectangles_color;
        let intensity = 0xff - 0x33 * (index >> 3);
        let channel = |bit: u8| if index & bit != 0 { intensity } else { 0 };
        r.pipelines
            .set_color(outline, Color::from_4ub(channel(1), channel(2), channel(4), 0xff));

        let position = &state.attributes[..1.min(state.attributes.len())];
        for quad in 0..batch_len {
            r.draw(
                outline,
                VerticesMode::LineLoop,
                state.current_vertex + 4 * quad,
                4,
                None,
                position,
                flags | DrawFlags::COLOR_ATTRIBUTE_IS_OPAQUE,
            );
        }

        // Skip black and white
        loop {
            self.rectangles_color = (self.rectangles_color + 1) & 0x1f;
            let low = self.rectangles_color & 0x07;
            if low != 0 && low != 0x07 {
                break;
            }
        }
    }

    /// Current debug outline color index
    pub fn rectangles_color(&self) -> u8 {
        self.rectangles_color
    }

    // --- software clipping ---

    /// Clip a short run of rectangle-clipped quads on the CPU so the run
    /// can batch with unclipped neighbours. Either every entry of the run
    /// is clipped or none is.
    fn maybe_software_clip_entries(&mut self, store: &PipelineStore, run: Range<usize>) {
        if run.len() >= self.hardware_clip_threshold {
            return;
        }
        let Some(clip) = self.entries[run.start].clip.clone() else {
            return;
        };
        let Some(bounds) = eye_space_clip_bounds(&clip) else {
            return;
        };

        let mut prev: Option<PipelineId> = None;
        for i in run.clone() {
            let entry = &self.entries[i];
            if prev != Some(entry.pipeline) {
                if store.user_program(entry.pipeline).is_some() || store.has_layer_user_matrix(entry.pipeline) {
                    return;
                }
                prev = Some(entry.pipeline);
            }
            if !self.quad_is_axis_aligned(entry) {
                return;
            }
        }

        if debug::enabled(DebugFlags::CLIPPING) {
            tracing::debug!("Software clipping a batch of length {}", run.len());
        }
        for i in run {
            self.software_clip_entry(i, bounds);
        }
    }

    fn quad_is_axis_aligned(&self, entry: &JournalEntry) -> bool {
        let stride = stride_for_layers(entry.n_layers, self.software_transform);
        let v = |n: usize| {
            let at = entry.array_offset + n * stride;
            (self.vertices[at], self.vertices[at + 1])
        };
        let (v0, v1, v2, v3) = (v(0), v(1), v(2), v(3));
        v0.0 == v1.0 && v1.1 == v2.1 && v2.0 == v3.0 && v3.1 == v0.1
    }

    fn software_clip_entry(&mut self, index: usize, bounds: [f32; 4]) {
        let entry = &mut self.entries[index];
        entry.clip = None;
        let n_layers = entry.n_layers;
        let base = entry.array_offset;
        let stride = stride_for_layers(n_layers, self.software_transform);
        let verts = &mut self.vertices[base..base + 4 * stride];
        let [cx0, cy0, cx1, cy1] = bounds;

        let (vx1, vy1) = (verts[0], verts[1]);
        let (vx2, vy2) = (verts[2 * stride], verts[2 * stride + 1]);

        let (mut rx1, mut rx2) = if vx1 < vx2 { (vx1, vx2) } else { (vx2, vx1) };
        let (mut ry1, mut ry2) = if vy1 < vy2 { (vy1, vy2) } else { (vy2, vy1) };
        rx1 = rx1.clamp(cx0, cx1);
        ry1 = ry1.clamp(cy0, cy1);
        rx2 = rx2.clamp(cx0, cx1);
        ry2 = ry2.clamp(cy0, cy1);

        if rx1 == rx2 || ry1 == ry2 {
            // Degenerate; the driver drops it cheaply
            for v in 0..4 {
                verts[v * stride] = 0.0;
                verts[v * stride + 1] = 0.0;
            }
            return;
        }

        if vx1 > vx2 {
            std::mem::swap(&mut rx1, &mut rx2);
        }
        if vy1 > vy2 {
            std::mem::swap(&mut ry1, &mut ry2);
        }

        let corners = [(rx1, ry1), (rx1, ry2), (rx2, ry2), (rx2, ry1)];
        for (v, (x, y)) in corners.into_iter().enumerate() {
            verts[v * stride] = x;
            verts[v * stride + 1] = y;
        }

        // Clamped corners as fractions of the original quad
        let fx1 = (rx1 - vx1) / (vx2 - vx1);
        let fy1 = (ry1 - vy1) / (vy2 - vy1);
        let fx2 = (rx2 - vx1) / (vx2 - vx1);
        let fy2 = (ry2 - vy1) / (vy2 - vy1);

        let tex_base = pos_stride(self.software_transform) + COLOR_STRIDE;
        for layer in 0..n_layers {
            let t = tex_base + TEX_STRIDE * layer;
            let (tx1, ty1) = (verts[t], verts[t + 1]);
            let (tx2, ty2) = (verts[2 * stride + t], verts[2 * stride + t + 1]);
            let s0 = fx1 * (tx2 - tx1) + tx1;
            let t0 = fy1 * (ty2 - ty1) + ty1;
            let s1 = fx2 * (tx2 - tx1) + tx1;
            let t1 = fy2 * (ty2 - ty1) + ty1;
            let corner_tex = [(s0, t0), (s0, t1), (s1, t1), (s1, t0)];
            for (v, (s, tc)) in corner_tex.into_iter().enumerate() {
                verts[v * stride + t] = s;
                verts[v * stride + t + 1] = tc;
            }
        }
    }

    // --- queries ---

    /// Whether every logged quad is known to be clipped to within
    /// `x0, y0, x1, y1` (window coordinates). `false` means unknown.
    pub fn all_entries_within_bounds(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> bool {
        let Some(first) = self.entries.first() else {
            return true;
        };

        // Shortest ancestry of the first clip that is still within bounds
        let mut reference: Option<&ClipStack> = None;
        if let Some(clip) = &first.clip {
            for entry in clip.iter() {
                if entry.bounds().within(x0, y0, x1, y1) {
                    reference = Some(entry);
                } else {
                    break;
                }
            }
        }
        let Some(reference) = reference else {
            return false;
        };

        self.entries[1..].iter().all(|entry| {
            entry
                .clip
                .as_ref()
                .is_some_and(|clip| clip.has_ancestor(reference))
        })
    }
}

/// Bounds in eye space of a clip stack made only of rectangles under
/// axis aligned modelviews, as `[x0, y0, x1, y1]`. An empty intersection
/// gives a zero box.
fn eye_space_clip_bounds(clip: &ClipStack) -> Option<[f32; 4]> {
    let mut bounds = [f32::MIN, f32::MIN, f32::MAX, f32::MAX];
    for entry in clip.iter() {
        let ClipEntryKind::Rect {
            x0,
            y0,
            x1,
            y1,
            modelview,
        } = entry.kind()
        else {
            return None;
        };
        if !modelview.is_axis_aligned_2d() {
            return None;
        }
        let a = modelview.transform_point(*x0, *y0, 0.0, 1.0);
        let b = modelview.transform_point(*x1, *y1, 0.0, 1.0);
        bounds[0] = bounds[0].max(a[0].min(b[0]));
        bounds[1] = bounds[1].max(a[1].min(b[1]));
        bounds[2] = bounds[2].min(a[0].max(b[0]));
        bounds[3] = bounds[3].min(a[1].max(b[1]));
    }
    if bounds[2] <= bounds[0] || bounds[3] <= bounds[1] {
        bounds = [0.0; 4];
    }
    Some(bounds)
}

fn same_clip(a: &JournalEntry, b: &JournalEntry) -> bool {
    ClipStack::ptr_eq(a.clip.as_ref(), b.clip.as_ref())
}

/// Layer counts that share a padded vertex stride
fn stride_compatible(a: usize, b: usize) -> bool {
    a == b || (a <= MIN_LAYER_PADDING && b <= MIN_LAYER_PADDING)
}

/// Shallow pipeline equality ignoring color, which lives in the vertices
fn same_pipeline_state(store: &PipelineStore, a: PipelineId, b: PipelineId) -> bool {
    store.equal(a, b, PipelineState::ALL_SPARSE - PipelineState::COLOR, LayerState::ALL_SPARSE)
}

fn offset_range(range: Range<usize>, by: usize) -> Range<usize> {
    range.start + by..range.end + by
}

/// Maximal runs of neighbours for which `same` holds, in order
fn batch_runs<T>(items: &[T], same: impl Fn(&T, &T) -> bool) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..items.len() {
        if !same(&items[i - 1], &items[i]) {
            runs.push(start..i);
            start = i;
        }
    }
    if !items.is_empty() {
        runs.push(start..items.len());
    }
    runs
}
