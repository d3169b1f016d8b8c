// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Recorded drawing commands.
//!
//! A [`Picture`] is an immutable, replayable list of canvas operations with
//! a stable identity. Layer trees reference pictures by handle; the raster
//! cache keys on [`PictureId`], so recording the same content twice yields
//! two distinct cacheable entities.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use peniko::kurbo::{Affine, BezPath, Point, Rect, RoundedRect, Vec2};
use smallvec::{smallvec, SmallVec};

use crate::canvas::{Canvas, DeviceImage, Paint, TextBlob};
use crate::geometry;

/// Stable identity of a recorded picture.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PictureId(pub NonZeroU64);

impl PictureId {
    pub fn next() -> Self {
        // We initialize with 1 so that the conversion below succeeds
        static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(NonZeroU64::new(ID_COUNTER.fetch_add(1, Ordering::Relaxed)).unwrap())
    }
}

/// Single recorded canvas operation.
#[derive(Clone, Debug)]
pub enum DrawOp {
    Save,
    SaveLayer(Option<Rect>, Paint),
    Restore,
    Translate(Vec2),
    Transform(Affine),
    SetTransform(Affine),
    ClipRect {
        rect: Rect,
        anti_alias: bool,
    },
    ClipRRect {
        rrect: RoundedRect,
        anti_alias: bool,
    },
    ClipPath {
        path: BezPath,
        anti_alias: bool,
    },
    DrawRect {
        rect: Rect,
        paint: Paint,
    },
    DrawPicture(Picture),
    DrawImage {
        image: DeviceImage,
        dst: Rect,
        paint: Paint,
    },
    DrawTextBlob {
        blob: TextBlob,
        origin: Point,
        paint: Paint,
    },
}

/// An immutable sequence of drawing commands with a cull rect.
#[derive(Clone, Debug)]
pub struct Picture {
    id: PictureId,
    cull_rect: Rect,
    ops: Arc<[DrawOp]>,
}

static_assertions::assert_impl_all!(Picture: Send, Sync);

impl Picture {
    pub fn id(&self) -> PictureId {
        self.id
    }

    /// Conservative bounds of everything this picture can draw, in the
    /// picture's local space.
    pub fn cull_rect(&self) -> Rect {
        self.cull_rect
    }

    /// Number of recorded operations, used as a cheapness heuristic by the
    /// raster cache.
    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Replays every recorded operation into `canvas`, bracketed by a
    /// save/restore so recorded state changes cannot leak out.
    pub fn replay(&self, canvas: &mut dyn Canvas) {
        canvas.save();
        for op in self.ops.iter() {
            match op {
                DrawOp::Save => canvas.save(),
                DrawOp::SaveLayer(bounds, paint) => canvas.save_layer(*bounds, paint),
                DrawOp::Restore => canvas.restore(),
                DrawOp::Translate(offset) => canvas.translate(*offset),
                DrawOp::Transform(t) => canvas.transform(*t),
                DrawOp::SetTransform(t) => canvas.set_transform(*t),
                DrawOp::ClipRect { rect, anti_alias } => canvas.clip_rect(*rect, *anti_alias),
                DrawOp::ClipRRect { rrect, anti_alias } => canvas.clip_rrect(*rrect, *anti_alias),
                DrawOp::ClipPath { path, anti_alias } => canvas.clip_path(path, *anti_alias),
                DrawOp::DrawRect { rect, paint } => canvas.draw_rect(*rect, paint),
                DrawOp::DrawPicture(picture) => canvas.draw_picture(picture),
                DrawOp::DrawImage { image, dst, paint } => canvas.draw_image(image, *dst, paint),
                DrawOp::DrawTextBlob {
                    blob,
                    origin,
                    paint,
                } => canvas.draw_text_blob(blob, *origin, paint),
            }
        }
        canvas.restore();
    }
}

#[derive(Clone, Copy)]
struct RecordState {
    transform: Affine,
    clip: Rect,
}

/// Records canvas calls into a [`Picture`].
///
/// The recorder tracks transform and clip state so that
/// [`current_transform`](Canvas::current_transform) and
/// [`device_clip_bounds`](Canvas::device_clip_bounds) answer consistently
/// during recording, mirroring what a direct paint would have seen.
pub struct PictureRecorder {
    cull_rect: Rect,
    ops: Vec<DrawOp>,
    stack: SmallVec<[RecordState; 8]>,
}

impl PictureRecorder {
    pub fn new(cull_rect: Rect) -> Self {
        Self {
            cull_rect,
            ops: Vec::new(),
            stack: smallvec![RecordState {
                transform: Affine::IDENTITY,
                clip: cull_rect,
            }],
        }
    }

    /// Finishes recording. Unbalanced saves are implicitly restored.
    pub fn finish(self) -> Picture {
        Picture {
            id: PictureId::next(),
            cull_rect: self.cull_rect,
            ops: self.ops.into(),
        }
    }

    fn state(&self) -> RecordState {
        *self.stack.last().unwrap()
    }

    fn state_mut(&mut self) -> &mut RecordState {
        self.stack.last_mut().unwrap()
    }

    fn apply_clip(&mut self, local_bounds: Rect) {
        let state = self.state();
        let device = geometry::transformed_bounds(state.transform, local_bounds);
        self.state_mut().clip = geometry::intersect_paint_bounds(state.clip, device);
    }
}

impl Canvas for PictureRecorder {
    fn save(&mut self) {
        self.stack.push(self.state());
        self.ops.push(DrawOp::Save);
    }

    fn save_layer(&mut self, bounds: Option<Rect>, paint: &Paint) {
        self.stack.push(self.state());
        self.ops.push(DrawOp::SaveLayer(bounds, paint.clone()));
    }

    fn restore(&mut self) {
        if self.stack.len() <= 1 {
            debug_assert!(false, "restore without matching save");
            return;
        }
        self.stack.pop();
        self.ops.push(DrawOp::Restore);
    }

    fn translate(&mut self, offset: Vec2) {
        let state = self.state_mut();
        state.transform = state.transform * Affine::translate(offset);
        self.ops.push(DrawOp::Translate(offset));
    }

    fn transform(&mut self, transform: Affine) {
        let state = self.state_mut();
        state.transform = state.transform * transform;
        self.ops.push(DrawOp::Transform(transform));
    }

    fn set_transform(&mut self, transform: Affine) {
        self.state_mut().transform = transform;
        self.ops.push(DrawOp::SetTransform(transform));
    }

    fn current_transform(&self) -> Affine {
        self.state().transform
    }

    fn clip_rect(&mut self, rect: Rect, anti_alias: bool) {
        self.apply_clip(rect);
        self.ops.push(DrawOp::ClipRect { rect, anti_alias });
    }

    fn clip_rrect(&mut self, rrect: RoundedRect, anti_alias: bool) {
        self.apply_clip(rrect.rect());
        self.ops.push(DrawOp::ClipRRect { rrect, anti_alias });
    }

    fn clip_path(&mut self, path: &BezPath, anti_alias: bool) {
        use peniko::kurbo::Shape;
        self.apply_clip(path.bounding_box());
        self.ops.push(DrawOp::ClipPath {
            path: path.clone(),
            anti_alias,
        });
    }

    fn device_clip_bounds(&self) -> Rect {
        self.state().clip
    }

    fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.ops.push(DrawOp::DrawRect {
            rect,
            paint: paint.clone(),
        });
    }

    fn draw_picture(&mut self, picture: &Picture) {
        self.ops.push(DrawOp::DrawPicture(picture.clone()));
    }

    fn draw_image(&mut self, image: &DeviceImage, dst: Rect, paint: &Paint) {
        self.ops.push(DrawOp::DrawImage {
            image: image.clone(),
            dst,
            paint: paint.clone(),
        });
    }

    fn draw_text_blob(&mut self, blob: &TextBlob, origin: Point, paint: &Paint) {
        self.ops.push(DrawOp::DrawTextBlob {
            blob: blob.clone(),
            origin,
            paint: paint.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peniko::Color;

    fn red() -> Paint {
        Paint {
            color: Color::rgba8(255, 0, 0, 255),
            ..Paint::default()
        }
    }

    #[test]
    fn ids_are_unique() {
        let a = PictureRecorder::new(Rect::ZERO).finish();
        let b = PictureRecorder::new(Rect::ZERO).finish();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn recorder_tracks_transform_and_clip() {
        let mut rec = PictureRecorder::new(Rect::new(0.0, 0.0, 100.0, 100.0));
        rec.save();
        rec.translate(Vec2::new(10.0, 10.0));
        rec.clip_rect(Rect::new(0.0, 0.0, 50.0, 50.0), false);
        assert_eq!(
            rec.device_clip_bounds(),
            Rect::new(10.0, 10.0, 60.0, 60.0)
        );
        rec.restore();
        assert_eq!(rec.current_transform(), Affine::IDENTITY);
        assert_eq!(
            rec.device_clip_bounds(),
            Rect::new(0.0, 0.0, 100.0, 100.0)
        );
        let picture = rec.finish();
        assert_eq!(picture.op_count(), 4);
    }

    #[test]
    fn replay_reproduces_the_recording() {
        let mut rec = PictureRecorder::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        rec.draw_rect(Rect::new(1.0, 1.0, 2.0, 2.0), &red());
        let picture = rec.finish();

        let mut target = PictureRecorder::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        picture.replay(&mut target);
        let replayed = target.finish();
        // Save + draw + restore.
        assert_eq!(replayed.op_count(), 3);
    }

    #[test]
    fn unbalanced_restore_is_ignored() {
        let mut rec = PictureRecorder::new(Rect::ZERO);
        rec.draw_rect(Rect::new(0.0, 0.0, 1.0, 1.0), &red());
        // No save on the stack; release builds must not underflow.
        if cfg!(not(debug_assertions)) {
            rec.restore();
            assert_eq!(rec.finish().op_count(), 1);
        }
    }
}
