// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interleaving of platform-native views with composited content.
//!
//! An [`ExternalViewEmbedder`] owns the native side of platform views. Per
//! frame it hears about every embedded view during preroll (with the full
//! mutator stack that applies to it), hands out overlay canvases during
//! paint, and commits or cancels the whole arrangement at the end. The
//! state machine is strictly `begin_frame` -> preroll* -> composite* ->
//! (`submit_frame` | `cancel_frame`); `cancel_frame` is valid at any point
//! and restores the embedder to its idle state.

use std::collections::HashMap;

use peniko::kurbo::{Affine, BezPath, Point, Rect, RoundedRect, Size};

use crate::canvas::Canvas;
use crate::picture::{Picture, PictureRecorder};

/// Identifier of a platform view, assigned by the platform side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ViewId(pub i64);

/// One transformation or clip applied on the path from the root to an
/// embedded view.
#[derive(Clone, Debug)]
pub enum Mutator {
    ClipRect(Rect),
    ClipRRect(RoundedRect),
    ClipPath(BezPath),
    Transform(Affine),
    Opacity(u8),
}

/// The ordered mutators accumulated above a platform view during preroll.
///
/// Order is outermost first, so replaying the stack reproduces the state
/// the view would have been painted under.
#[derive(Clone, Debug, Default)]
pub struct MutatorsStack {
    mutators: Vec<Mutator>,
}

impl MutatorsStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutator: Mutator) {
        self.mutators.push(mutator);
    }

    pub fn pop(&mut self) {
        self.mutators.pop();
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutator> {
        self.mutators.iter()
    }

    /// The combined transform of every [`Mutator::Transform`] entry.
    pub fn total_transform(&self) -> Affine {
        self.mutators
            .iter()
            .fold(Affine::IDENTITY, |acc, m| match m {
                Mutator::Transform(t) => acc * *t,
                _ => acc,
            })
    }
}

/// Per-frame placement of one platform view, in device pixels.
#[derive(Clone, Debug)]
pub struct EmbeddedViewParams {
    pub offset: Point,
    pub size: Size,
    pub mutators: MutatorsStack,
}

impl EmbeddedViewParams {
    /// The view's rect before mutators are applied.
    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.offset, self.size)
    }

    /// The view's device rect with the mutator transforms applied.
    pub fn final_bounds(&self) -> Rect {
        crate::geometry::transformed_bounds(self.mutators.total_transform(), self.bounds())
    }
}

/// What the rasterizer should do once preroll has finished.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PostPrerollAction {
    /// Continue with the paint pass.
    Success,
    /// Abandon this attempt and resubmit the same tree; the embedder needs
    /// another go (e.g. it just merged the platform and raster threads).
    ResubmitFrame,
}

/// Host interface for interleaving native views with composited layers.
pub trait ExternalViewEmbedder {
    /// Starts a frame, resetting all per-frame bookkeeping.
    fn begin_frame(&mut self, frame_size: Size, device_pixel_ratio: f64);

    /// Records the placement of `view_id` discovered during preroll.
    fn preroll_composite_embedded_view(&mut self, view_id: ViewId, params: EmbeddedViewParams);

    /// Called once after the whole tree has been prerolled.
    fn post_preroll_action(&mut self) -> PostPrerollAction {
        PostPrerollAction::Success
    }

    /// Returns the overlay canvas for content that paints above `view_id`.
    ///
    /// The embedder itself is responsible for positioning the native view;
    /// the compositor only draws the overlay content.
    fn composite_embedded_view(&mut self, view_id: ViewId) -> &mut dyn Canvas;

    /// Commits the frame. Returns false if nothing could be presented.
    fn submit_frame(&mut self) -> bool;

    /// Abandons the in-progress frame; idempotent and valid in any state.
    fn cancel_frame(&mut self);
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
enum FramePhase {
    #[default]
    Idle,
    Active,
}

/// A committed arrangement of platform views and their overlay pictures.
#[derive(Debug)]
pub struct SubmittedFrame {
    pub frame_size: Size,
    pub device_pixel_ratio: f64,
    /// Views in back-to-front order of first composition.
    pub composition_order: Vec<ViewId>,
    pub params: HashMap<ViewId, EmbeddedViewParams>,
    /// Overlay content recorded above each view.
    pub overlays: HashMap<ViewId, Picture>,
}

/// An [`ExternalViewEmbedder`] that records overlay content into pictures.
///
/// Suitable for embedders whose native side consumes a display list per
/// overlay, and for exercising the frame state machine in tests.
#[derive(Default)]
pub struct OverlayViewEmbedder {
    phase: FramePhase,
    frame_size: Size,
    device_pixel_ratio: f64,
    params: HashMap<ViewId, EmbeddedViewParams>,
    composition_order: Vec<ViewId>,
    overlays: HashMap<ViewId, PictureRecorder>,
    submitted: Option<SubmittedFrame>,
}

impl OverlayViewEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase(&self) -> FramePhase {
        self.phase
    }

    fn reset_frame_state(&mut self) {
        self.params.clear();
        self.composition_order.clear();
        self.overlays.clear();
        self.phase = FramePhase::Idle;
    }

    /// Number of views prerolled in the current frame.
    pub fn view_count(&self) -> usize {
        self.params.len()
    }

    /// Takes the most recently submitted frame, if any.
    pub fn take_submitted_frame(&mut self) -> Option<SubmittedFrame> {
        self.submitted.take()
    }
}

impl ExternalViewEmbedder for OverlayViewEmbedder {
    fn begin_frame(&mut self, frame_size: Size, device_pixel_ratio: f64) {
        debug_assert_eq!(self.phase(), FramePhase::Idle, "begin_frame while active");
        self.reset_frame_state();
        self.frame_size = frame_size;
        self.device_pixel_ratio = device_pixel_ratio;
        self.phase = FramePhase::Active;
    }

    fn preroll_composite_embedded_view(&mut self, view_id: ViewId, params: EmbeddedViewParams) {
        debug_assert_eq!(self.phase(), FramePhase::Active, "preroll outside a frame");
        self.params.insert(view_id, params);
    }

    fn composite_embedded_view(&mut self, view_id: ViewId) -> &mut dyn Canvas {
        debug_assert_eq!(self.phase(), FramePhase::Active, "composite outside a frame");
        if !self.composition_order.contains(&view_id) {
            self.composition_order.push(view_id);
        }
        let frame_rect = self.frame_size.to_rect();
        self.overlays
            .entry(view_id)
            .or_insert_with(|| PictureRecorder::new(frame_rect))
    }

    fn submit_frame(&mut self) -> bool {
        if self.phase() != FramePhase::Active {
            debug_assert!(false, "submit_frame outside a frame");
            return false;
        }
        let overlays = self
            .overlays
            .drain()
            .map(|(id, recorder)| (id, recorder.finish()))
            .collect();
        self.submitted = Some(SubmittedFrame {
            frame_size: self.frame_size,
            device_pixel_ratio: self.device_pixel_ratio,
            composition_order: std::mem::take(&mut self.composition_order),
            params: std::mem::take(&mut self.params),
            overlays,
        });
        self.reset_frame_state();
        true
    }

    fn cancel_frame(&mut self) {
        self.reset_frame_state();
    }
}
