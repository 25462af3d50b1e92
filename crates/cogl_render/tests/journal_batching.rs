//! Journal batching tests
//!
//! These tests verify that:
//! - Quads sharing pipeline, clip and layer count become one draw
//! - Batches never reorder quads
//! - Vertex strides pad layer counts up to two
//! - Pipelines that differ are never collapsed into one draw
//! - The debug switches change batching the way they say
//!
//! The debug flags are process-wide, so every test here holds `LOCK`.

use cogl_core::debug::{self, DebugFlags};
use cogl_core::{Color, PixelFormat};
use cogl_render::{
    stride_for_layers, Context, ContextConfig, DriverCall, PipelineId, Texture, VerticesMode,
};
use std::sync::{Mutex, MutexGuard, PoisonError};

static LOCK: Mutex<()> = Mutex::new(());

fn lock() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    debug::reset();
    guard
}

fn textured(ctx: &mut Context, n_layers: usize) -> PipelineId {
    let p = ctx.new_pipeline();
    for unit in 0..n_layers {
        let texture = Texture::new_2d(16, 16, PixelFormat::Rgb888);
        ctx.pipelines_mut().set_layer_texture(p, unit as i32, Some(texture));
    }
    p
}

fn draws(ctx: &Context) -> Vec<DriverCall> {
    ctx.driver().draws().cloned().collect()
}

/// Same pipeline, clip and layer count gives exactly one indexed draw
#[test]
fn test_same_state_is_one_draw() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let p = textured(&mut ctx, 1);
    ctx.push_source(p).unwrap();

    for i in 0..20 {
        // Moving quads still batch under software transform
        ctx.push_matrix();
        ctx.translate(i as f32 * 3.0, 0.0, 0.0);
        ctx.textured_rectangle([0.0, 0.0, 2.0, 2.0], &[0.0, 0.0, 1.0, 1.0]);
        ctx.pop_matrix().unwrap();
    }
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 1);
    assert!(matches!(draws[0], DriverCall::DrawElements { .. }));
    assert_eq!(draws[0].draw_range(), Some((VerticesMode::Triangles, 0, 120)));

    // Positions were transformed when logged
    let position = draws[0].attribute("cogl_position_in").unwrap();
    assert_eq!(position.n_components, 3);
    assert_eq!(position.read_floats(4 * 19).unwrap()[0], 57.0);
}

/// Batches come out in logging order and each quad keeps its slot
#[test]
fn test_batches_preserve_order() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let a = textured(&mut ctx, 1);
    let b = textured(&mut ctx, 1);
    let texture_of = |ctx: &Context, p: PipelineId| ctx.pipelines().layer_texture(p, 0).unwrap().gl_name();
    let (name_a, name_b) = (texture_of(&ctx, a), texture_of(&ctx, b));

    for (i, p) in [a, a, b, b, a].into_iter().enumerate() {
        let x = i as f32 * 10.0;
        ctx.log_quad([x, 0.0, x + 5.0, 5.0], p, 1, &Default::default(), &[]);
    }
    ctx.flush();

    let draws = draws(&ctx);
    let ranges: Vec<_> = draws.iter().filter_map(DriverCall::draw_range).collect();
    assert_eq!(
        ranges,
        vec![
            (VerticesMode::Triangles, 0, 12),
            (VerticesMode::Triangles, 12, 12),
            (VerticesMode::TriangleFan, 16, 4),
        ]
    );

    let textures: Vec<_> = ctx.driver().pipeline_flushes().map(|p| p.textures[0]).collect();
    assert_eq!(textures, vec![name_a, name_b, name_a]);

    let position = draws[2].attribute("cogl_position_in").unwrap();
    assert_eq!(position.read_floats(16).unwrap()[0], 40.0);
}

/// One and two layers share a stride; three layers start a new one
#[test]
fn test_stride_padding_boundary() {
    let _guard = lock();
    assert_eq!(stride_for_layers(1, true), stride_for_layers(2, true));
    assert_ne!(stride_for_layers(2, true), stride_for_layers(3, true));

    let mut ctx = Context::new(ContextConfig::default());
    let one = textured(&mut ctx, 1);
    let two = textured(&mut ctx, 2);
    let three = textured(&mut ctx, 3);
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], one, 1, &Default::default(), &[]);
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], two, 2, &Default::default(), &[]);
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], three, 3, &Default::default(), &[]);
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 3);
    let position = |i: usize| draws[i].attribute("cogl_position_in").unwrap().clone();

    // Shared stride: same vertex run, second quad follows the first
    assert_eq!(position(0).stride, position(1).stride);
    assert_eq!(position(0).offset, position(1).offset);
    assert_eq!(draws[1].draw_range(), Some((VerticesMode::TriangleFan, 4, 4)));

    // New stride: new vertex run
    assert_eq!(position(2).stride, stride_for_layers(3, true) * 4);
    assert_eq!(position(2).offset, position(0).stride * 4 * 2);
    assert_eq!(draws[2].draw_range(), Some((VerticesMode::TriangleFan, 0, 4)));
    assert!(draws[2].attribute("cogl_tex_coord2_in").is_some());
    assert!(draws[1].attribute("cogl_tex_coord2_in").is_none());
}

/// Flushing an empty journal never reaches the driver
#[test]
fn test_empty_flush_is_noop() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    ctx.flush();
    assert!(ctx.driver().calls().is_empty());

    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.flush();
    ctx.driver_mut().clear();
    ctx.flush();
    assert!(ctx.driver().calls().is_empty());
}

/// Alternating between two different pipelines draws every quad alone
#[test]
fn test_alternating_pipelines_never_collapse() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let a = textured(&mut ctx, 1);
    let b = textured(&mut ctx, 1);
    for i in 0..100 {
        let p = if i % 2 == 0 { a } else { b };
        ctx.log_quad([0.0, 0.0, 1.0, 1.0], p, 1, &Default::default(), &[]);
    }
    ctx.flush();
    assert_eq!(ctx.driver().draw_count(), 100);
}

/// Colors live in the vertices, so they never split a batch
#[test]
fn test_color_does_not_split_batches() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let red = ctx.new_pipeline();
    let green = ctx.new_pipeline();
    ctx.pipelines_mut().set_color(red, Color::RED);
    ctx.pipelines_mut().set_color(green, Color::GREEN);
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], red, 0, &Default::default(), &[]);
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], green, 0, &Default::default(), &[]);
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 1);
    let color = draws[0].attribute("cogl_color_in").unwrap();
    assert!(color.normalized);
    assert_eq!(color.read_bytes(0).unwrap().as_slice(), &[0xff, 0, 0, 0xff]);
    assert_eq!(color.read_bytes(4).unwrap().as_slice(), &[0, 0xff, 0, 0xff]);
}

/// Without software transform each modelview gets its own draw
#[test]
fn test_hardware_transform_batches_by_modelview() {
    let _guard = lock();
    let config = ContextConfig {
        software_transform: false,
        ..Default::default()
    };
    let mut ctx = Context::new(config);
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.rectangle(1.0, 0.0, 2.0, 1.0);
    ctx.translate(5.0, 0.0, 0.0);
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 2);
    let position = draws[0].attribute("cogl_position_in").unwrap();
    assert_eq!(position.n_components, 2);
    assert_eq!(position.stride, stride_for_layers(0, false) * 4);
    let last_modelview = ctx.driver().modelview_flushes().last().copied().unwrap();
    assert_eq!(last_modelview.transform_point(0.0, 0.0, 0.0, 1.0)[0], 5.0);
}

/// The debug flag forces hardware transform
#[test]
fn test_disable_software_transform_flag() {
    let _guard = lock();
    debug::set(DebugFlags::DISABLE_SOFTWARE_TRANSFORM);
    let mut ctx = Context::new(ContextConfig::default());
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    assert!(!ctx.journal().software_transform());
    ctx.flush();
    let draws = draws(&ctx);
    assert_eq!(draws[0].attribute("cogl_position_in").unwrap().n_components, 2);
    debug::reset();
}

/// Disabling batching flushes after every quad
#[test]
fn test_disable_batching_flag() {
    let _guard = lock();
    debug::set(DebugFlags::DISABLE_BATCHING);
    let mut ctx = Context::new(ContextConfig::default());
    for _ in 0..3 {
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        assert!(ctx.journal().is_empty());
    }
    assert_eq!(ctx.driver().draw_count(), 3);
    debug::reset();
}

/// A short clipped run is clipped on the CPU and joins its neighbours
#[test]
fn test_software_clip_merges_batches() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.push_clip_rectangle(0.0, 0.0, 5.0, 5.0);
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.pop_clip();
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 1);
    let position = draws[0].attribute("cogl_position_in").unwrap();
    assert_eq!(position.read_floats(6).unwrap()[0], 5.0);
    assert_eq!(position.read_floats(10).unwrap()[0], 10.0);
}

/// With software clipping off each clip run is its own draw
#[test]
fn test_disable_software_clip_flag() {
    let _guard = lock();
    debug::set(DebugFlags::DISABLE_SOFTWARE_CLIP);
    let mut ctx = Context::new(ContextConfig::default());
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.push_clip_rectangle(0.0, 0.0, 5.0, 5.0);
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.pop_clip();
    ctx.rectangle(0.0, 0.0, 10.0, 10.0);
    ctx.flush();
    assert_eq!(ctx.driver().draw_count(), 3);
    debug::reset();
}

/// Long clipped runs keep the clip and flush it to the driver once
#[test]
fn test_long_clip_run_uses_hardware_clip() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    ctx.push_clip_window_rectangle(0, 0, 50, 50);
    for i in 0..8 {
        let x = i as f32;
        ctx.rectangle(x, 0.0, x + 1.0, 1.0);
    }
    ctx.flush();

    assert_eq!(ctx.driver().draw_count(), 1);
    let clip_depths: Vec<_> = ctx
        .driver()
        .calls()
        .iter()
        .filter_map(|c| match c {
            DriverCall::FlushClip { depth, .. } => Some(*depth),
            _ => None,
        })
        .collect();
    assert_eq!(clip_depths, vec![1]);
}

/// Outline mode adds a line loop per quad after each batch
#[test]
fn test_rectangles_flag_draws_outlines() {
    let _guard = lock();
    debug::set(DebugFlags::RECTANGLES);
    let mut ctx = Context::new(ContextConfig::default());
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.rectangle(2.0, 0.0, 3.0, 1.0);
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 3);
    assert_eq!(draws[1].draw_range(), Some((VerticesMode::LineLoop, 0, 4)));
    assert_eq!(draws[2].draw_range(), Some((VerticesMode::LineLoop, 4, 4)));
    assert_eq!(draws[2].attributes().len(), 1);
    // One color per batch; the second outline reuses the flushed pipeline
    let outline_colors: Vec<_> = ctx.driver().pipeline_flushes().skip(1).map(|p| p.color).collect();
    assert_eq!(outline_colors, vec![Color::RED]);
    assert_eq!(ctx.journal().rectangles_color(), 2);
    debug::reset();
}

/// Vertex buffers are reused across flushes unless disabled
#[test]
fn test_vbo_pool() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig {
        vbo_pool_size: 2,
        ..Default::default()
    });
    for _ in 0..5 {
        ctx.rectangle(0.0, 0.0, 1.0, 1.0);
        ctx.flush();
    }
    assert_eq!(ctx.journal().vbo_pool().count(), 2);

    debug::set(DebugFlags::DISABLE_VBOS);
    let mut ctx = Context::new(ContextConfig::default());
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.flush();
    assert_eq!(ctx.journal().vbo_pool().count(), 0);
    assert_eq!(ctx.driver().draw_count(), 1);
    debug::reset();
}

/// Opaque pipelines draw as themselves; translucent ones blend
#[test]
fn test_blend_state_reaches_driver() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let opaque = ctx.new_pipeline();
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], opaque, 0, &Default::default(), &[]);
    ctx.flush();
    let flushed: Vec<_> = ctx.driver().pipeline_flushes().cloned().collect();
    assert_eq!(flushed[0].pipeline, opaque);
    assert!(!flushed[0].real_blend_enable);

    let glass = ctx.new_pipeline();
    ctx.pipelines_mut().set_color(glass, Color::WHITE.with_alpha(0x40));
    ctx.driver_mut().clear();
    ctx.log_quad([0.0, 0.0, 1.0, 1.0], glass, 0, &Default::default(), &[]);
    ctx.flush();
    let flushed: Vec<_> = ctx.driver().pipeline_flushes().cloned().collect();
    assert_eq!(flushed[0].pipeline, glass);
    assert!(flushed[0].real_blend_enable);
}

/// Known clip bounds let a caller skip work outside them
#[test]
fn test_entries_within_bounds() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    assert!(ctx.all_entries_within_bounds(0.0, 0.0, 1.0, 1.0));
    ctx.push_clip_window_rectangle(10, 10, 20, 20);
    ctx.rectangle(0.0, 0.0, 100.0, 100.0);
    ctx.rectangle(0.0, 0.0, 100.0, 100.0);
    assert!(ctx.all_entries_within_bounds(0.0, 0.0, 30.0, 30.0));
    assert!(!ctx.all_entries_within_bounds(0.0, 0.0, 25.0, 25.0));
    ctx.discard();
    assert!(ctx.journal().is_empty());
}

/// Regions of one atlas share a draw, each sampling its own part of it
#[test]
fn test_atlas_regions_batch_with_their_own_coords() {
    let _guard = lock();
    let mut ctx = Context::new(ContextConfig::default());
    let atlas = Texture::new_2d(256, 256, PixelFormat::Rgba8888Pre);
    let left = ctx.new_pipeline();
    let right = ctx.new_pipeline();
    ctx.pipelines_mut()
        .set_layer_texture(left, 0, Some(Texture::new_atlas_region(&atlas, 0, 0, 128, 128)));
    ctx.pipelines_mut()
        .set_layer_texture(right, 0, Some(Texture::new_atlas_region(&atlas, 128, 0, 128, 128)));

    ctx.push_source(left).unwrap();
    ctx.rectangle(0.0, 0.0, 1.0, 1.0);
    ctx.set_source(right).unwrap();
    ctx.rectangle(1.0, 0.0, 2.0, 1.0);
    ctx.pop_source();
    ctx.flush();

    let draws = draws(&ctx);
    assert_eq!(draws.len(), 1);
    let tex = draws[0].attribute("cogl_tex_coord0_in").unwrap();
    assert_eq!(tex.read_floats(0).unwrap().as_slice(), &[0.0, 0.0]);
    assert_eq!(tex.read_floats(2).unwrap().as_slice(), &[0.5, 0.5]);
    assert_eq!(tex.read_floats(4).unwrap().as_slice(), &[0.5, 0.0]);
    assert_eq!(tex.read_floats(6).unwrap().as_slice(), &[1.0, 0.5]);
}
