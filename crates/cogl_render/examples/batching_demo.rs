//! Journal batching demo
//!
//! Logs a small scene of rectangles through the journal and prints the
//! draw calls that reach the recording driver.
//!
//! Run with:
//! `cargo run -p cogl_render --example batching_demo`
//!
//! Set `COGL_DEBUG=batching` to see each batch level.

use cogl_core::debug;
use cogl_core::{Color, PixelFormat};
use cogl_render::{Context, ContextConfig, DriverCall, Result, Texture};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();
    debug::init_from_env();

    let mut ctx = Context::new(ContextConfig::default());

    let tile = ctx.new_pipeline();
    ctx.pipelines_mut()
        .set_layer_texture(tile, 0, Some(Texture::new_2d(64, 64, PixelFormat::Rgb888)));
    let overlay = ctx.new_pipeline();
    ctx.pipelines_mut().set_color(overlay, Color::BLUE.with_alpha(0x80));

    // A 10x10 grid of tiles under moving modelviews
    ctx.push_source(tile)?;
    for row in 0..10 {
        for col in 0..10 {
            ctx.push_matrix();
            ctx.translate(col as f32 * 32.0, row as f32 * 32.0, 0.0);
            ctx.textured_rectangle([0.0, 0.0, 30.0, 30.0], &[0.0, 0.0, 1.0, 1.0]);
            ctx.pop_matrix()?;
        }
    }
    ctx.pop_source();

    // A few translucent overlays, one of them clipped
    ctx.push_source(overlay)?;
    ctx.rectangle(0.0, 0.0, 320.0, 16.0);
    ctx.push_clip_rectangle(0.0, 100.0, 160.0, 200.0);
    ctx.rectangle(0.0, 0.0, 320.0, 320.0);
    ctx.pop_clip();
    ctx.rectangle(0.0, 304.0, 320.0, 320.0);
    ctx.pop_source();

    let quads = ctx.journal().len();
    ctx.flush();

    for call in ctx.driver().calls() {
        if let DriverCall::DrawArrays { mode, first, count, .. } | DriverCall::DrawElements { mode, first, count, .. } =
            call
        {
            tracing::info!("draw {:?} first {} count {}", mode, first, count);
        }
    }
    tracing::info!(
        "{} quads drawn with {} draw calls and {} pipeline flushes",
        quads,
        ctx.driver().draw_count(),
        ctx.driver().pipeline_flush_count()
    );

    Ok(())
}
