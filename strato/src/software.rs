// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Software implementations of [`Canvas`] and [`ResourceContext`].
//!
//! This is a deliberately small rasterizer: hard-edged, axis-aligned fills
//! with source-over blending. Transformed geometry is flattened to its
//! device bounding box and clip shapes (rounded rects, paths) clip by their
//! bounds, so it is exact for the rect-and-image workloads the compositor
//! and its tests exercise, not a general path renderer. Anti-alias flags
//! are accepted and ignored.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use peniko::kurbo::{Affine, BezPath, Point, Rect, RoundedRect, Shape, Vec2};
use smallvec::{smallvec, SmallVec};

use crate::canvas::{Canvas, DeviceImage, Paint, ResourceContext, TextBlob};
use crate::geometry;
use crate::picture::Picture;
use crate::pixmap::{Pixmap, PremulRgba8};

#[derive(Clone, Copy)]
struct State {
    transform: Affine,
    clip: Rect,
    pushed_layer: bool,
}

struct Layer {
    pixmap: Pixmap,
    paint: Paint,
}

/// A [`Canvas`] that renders into an owned [`Pixmap`].
pub struct SoftwareCanvas {
    base: Pixmap,
    layers: Vec<Layer>,
    stack: SmallVec<[State; 8]>,
}

impl SoftwareCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            base: Pixmap::new(width, height),
            layers: Vec::new(),
            stack: smallvec![State {
                transform: Affine::IDENTITY,
                clip: Rect::new(0.0, 0.0, width as f64, height as f64),
                pushed_layer: false,
            }],
        }
    }

    /// Finishes drawing, compositing any layers left open.
    pub fn into_pixmap(mut self) -> Pixmap {
        while self.stack.len() > 1 {
            self.restore();
        }
        self.base
    }

    fn state(&self) -> State {
        *self.stack.last().unwrap()
    }

    fn target_mut(&mut self) -> &mut Pixmap {
        match self.layers.last_mut() {
            Some(layer) => &mut layer.pixmap,
            None => &mut self.base,
        }
    }

    /// Integer pixel span covered by the device-space rect, by pixel-center
    /// coverage. Returns `(x0, y0, x1, y1)` with exclusive ends.
    fn pixel_span(&self, device: Rect) -> Option<(u32, u32, u32, u32)> {
        if geometry::rect_is_empty(device) {
            return None;
        }
        let x0 = (device.x0 - 0.5).ceil().max(0.0) as u32;
        let y0 = (device.y0 - 0.5).ceil().max(0.0) as u32;
        let x1 = (device.x1 - 0.5).ceil().max(0.0) as u32;
        let y1 = (device.y1 - 0.5).ceil().max(0.0) as u32;
        (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
    }

    fn fill_device_rect(&mut self, device: Rect, src: PremulRgba8) {
        let clipped = geometry::intersect_paint_bounds(device, self.state().clip);
        let Some((x0, y0, x1, y1)) = self.pixel_span(clipped) else {
            return;
        };
        let target = self.target_mut();
        for y in y0..y1 {
            for x in x0..x1 {
                target.blend_pixel(x, y, src);
            }
        }
    }

    fn clip_device_bounds(&mut self, local_bounds: Rect) {
        let state = self.state();
        let device = geometry::transformed_bounds(state.transform, local_bounds);
        let clip = geometry::intersect_paint_bounds(state.clip, device);
        self.stack.last_mut().unwrap().clip = clip;
    }
}

impl Canvas for SoftwareCanvas {
    fn save(&mut self) {
        let mut state = self.state();
        state.pushed_layer = false;
        self.stack.push(state);
    }

    fn save_layer(&mut self, bounds: Option<Rect>, paint: &Paint) {
        let mut state = self.state();
        state.pushed_layer = true;
        self.stack.push(state);
        if let Some(bounds) = bounds {
            self.clip_device_bounds(bounds);
        }
        self.layers.push(Layer {
            pixmap: Pixmap::new(self.base.width(), self.base.height()),
            paint: paint.clone(),
        });
    }

    fn restore(&mut self) {
        if self.stack.len() <= 1 {
            debug_assert!(false, "restore without matching save");
            return;
        }
        let state = self.stack.pop().unwrap();
        if state.pushed_layer {
            let layer = self.layers.pop().expect("layer stack out of sync");
            let alpha = layer.paint.alpha();
            let target = self.target_mut();
            for y in 0..layer.pixmap.height() {
                for x in 0..layer.pixmap.width() {
                    let src = layer.pixmap.pixel(x, y).modulate(alpha);
                    if src.a > 0 || src.r > 0 || src.g > 0 || src.b > 0 {
                        target.blend_pixel(x, y, src);
                    }
                }
            }
        }
    }

    fn translate(&mut self, offset: Vec2) {
        let state = self.stack.last_mut().unwrap();
        state.transform = state.transform * Affine::translate(offset);
    }

    fn transform(&mut self, transform: Affine) {
        let state = self.stack.last_mut().unwrap();
        state.transform = state.transform * transform;
    }

    fn set_transform(&mut self, transform: Affine) {
        self.stack.last_mut().unwrap().transform = transform;
    }

    fn current_transform(&self) -> Affine {
        self.state().transform
    }

    fn clip_rect(&mut self, rect: Rect, _anti_alias: bool) {
        self.clip_device_bounds(rect);
    }

    fn clip_rrect(&mut self, rrect: RoundedRect, _anti_alias: bool) {
        self.clip_device_bounds(rrect.rect());
    }

    fn clip_path(&mut self, path: &BezPath, _anti_alias: bool) {
        self.clip_device_bounds(path.bounding_box());
    }

    fn device_clip_bounds(&self) -> Rect {
        self.state().clip
    }

    fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        let device = geometry::transformed_bounds(self.state().transform, rect);
        self.fill_device_rect(device, PremulRgba8::from_color(paint.color));
    }

    fn draw_picture(&mut self, picture: &Picture) {
        picture.replay(self);
    }

    fn draw_image(&mut self, image: &DeviceImage, dst: Rect, paint: &Paint) {
        let Some(source) = image.downcast_ref::<Pixmap>() else {
            // Foreign backend handle; nothing we can sample from.
            return;
        };
        let source = source.clone();
        let device = geometry::transformed_bounds(self.state().transform, dst);
        let clipped = geometry::intersect_paint_bounds(device, self.state().clip);
        let Some((x0, y0, x1, y1)) = self.pixel_span(clipped) else {
            return;
        };
        let alpha = paint.alpha();
        let sx = source.width() as f64 / device.width();
        let sy = source.height() as f64 / device.height();
        let target = self.target_mut();
        for y in y0..y1 {
            for x in x0..x1 {
                let u = ((x as f64 + 0.5 - device.x0) * sx).floor().max(0.0) as u32;
                let v = ((y as f64 + 0.5 - device.y0) * sy).floor().max(0.0) as u32;
                let src = source.pixel(u, v).modulate(alpha);
                target.blend_pixel(x, y, src);
            }
        }
    }

    fn draw_text_blob(&mut self, blob: &TextBlob, origin: Point, paint: &Paint) {
        // Shaping lives outside this crate; the blob's bounds stand in for
        // its coverage.
        let device = geometry::transformed_bounds(
            self.state().transform * Affine::translate(origin.to_vec2()),
            blob.bounds,
        );
        self.fill_device_rect(device, PremulRgba8::from_color(paint.color));
    }
}

/// A [`ResourceContext`] that rasterizes on the CPU.
#[derive(Default)]
pub struct SoftwareContext {
    cleanup_calls: AtomicUsize,
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many deferred-cleanup batches have run against this context.
    pub fn cleanup_count(&self) -> usize {
        self.cleanup_calls.load(Ordering::Relaxed)
    }
}

impl ResourceContext for SoftwareContext {
    fn rasterize(
        &self,
        width: u32,
        height: u32,
        transform: Affine,
        content: &mut dyn FnMut(&mut dyn Canvas),
    ) -> Option<DeviceImage> {
        if width == 0 || height == 0 {
            return None;
        }
        let mut canvas = SoftwareCanvas::new(width, height);
        canvas.set_transform(transform);
        content(&mut canvas);
        let pixmap = canvas.into_pixmap();
        Some(DeviceImage::new(width, height, Arc::new(pixmap)))
    }

    fn perform_deferred_cleanup(&self) {
        self.cleanup_calls.fetch_add(1, Ordering::Relaxed);
    }
}
