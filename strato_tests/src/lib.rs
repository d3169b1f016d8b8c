// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared helpers for the Strato integration tests.

use anyhow::{bail, Result};
use strato::kurbo::{Affine, Rect, Size};
use strato::peniko::Color;
use strato::{
    Canvas, CompositorContext, ExternalViewEmbedder, LayerTree, Paint, Picture, PictureRecorder,
    Pixmap, RasterStatus, ResourceContext, SoftwareCanvas, SoftwareContext,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn solid(r: u8, g: u8, b: u8) -> Paint {
    Paint {
        color: Color::rgba8(r, g, b, 255),
        ..Paint::default()
    }
}

/// Records `ops` copies of a filled rect; more ops than the cache's
/// minimum-op threshold so the picture is a caching candidate.
pub fn rect_picture(rect: Rect, color: Paint, ops: usize) -> Picture {
    let mut recorder = PictureRecorder::new(rect);
    for _ in 0..ops {
        recorder.draw_rect(rect, &color);
    }
    recorder.finish()
}

/// Rasters `tree` into a fresh software canvas of `size` physical pixels.
pub fn render_tree(
    context: &mut CompositorContext,
    resource_context: Option<&SoftwareContext>,
    view_embedder: Option<&mut dyn ExternalViewEmbedder>,
    tree: &mut LayerTree,
    size: Size,
) -> Result<Pixmap> {
    let mut canvas = SoftwareCanvas::new(size.width as u32, size.height as u32);
    let status = context
        .acquire_frame(
            &mut canvas,
            resource_context.map(|c| c as &dyn ResourceContext),
            view_embedder,
            Affine::IDENTITY,
        )
        .raster(tree);
    if status != RasterStatus::Success {
        bail!("raster returned {status:?}");
    }
    log::debug!("rastered frame {}", context.frame_number());
    Ok(canvas.into_pixmap())
}

/// Panics with coordinates on the first differing pixel.
pub fn assert_pixmaps_equal(a: &Pixmap, b: &Pixmap) {
    assert_eq!((a.width(), a.height()), (b.width(), b.height()));
    for y in 0..a.height() {
        for x in 0..a.width() {
            assert_eq!(a.pixel(x, y), b.pixel(x, y), "pixel ({x}, {y}) differs");
        }
    }
}
