// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The drawing sink consumed by the compositor.
//!
//! Strato never talks to a concrete GPU or raster backend; every paint walk
//! writes into a [`Canvas`], and offscreen rasterization for the cache goes
//! through a [`ResourceContext`]. Backends implement both. The crate ships a
//! software implementation in [`crate::software`] which is also what the
//! test suites render with.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use peniko::kurbo::{Affine, BezPath, Point, Rect, RoundedRect, Vec2};
use peniko::{BlendMode, Color};

use crate::picture::Picture;

/// Brush state for a single draw call.
#[derive(Clone, Debug, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub blend_mode: BlendMode,
    pub anti_alias: bool,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            blend_mode: BlendMode::default(),
            anti_alias: true,
        }
    }
}

impl Paint {
    /// A paint that only modulates alpha, as used for transparency layers.
    pub fn from_alpha(alpha: u8) -> Self {
        Self {
            color: Color::rgba8(0, 0, 0, alpha),
            ..Self::default()
        }
    }

    /// The alpha component of this paint's color.
    pub fn alpha(&self) -> u8 {
        self.color.a
    }
}

/// An opaque shaped-text primitive.
///
/// Text shaping happens outside this crate; the compositor only needs the
/// blob's bounds for culling and an identity for recording.
#[derive(Clone, Debug, PartialEq)]
pub struct TextBlob {
    pub bounds: Rect,
}

/// A handle to a backend-resident image, usually a cache rasterization.
///
/// The payload is opaque to the compositor; the backend that produced the
/// image downcasts it when asked to draw it.
#[derive(Clone)]
pub struct DeviceImage {
    width: u32,
    height: u32,
    payload: Arc<dyn Any + Send + Sync>,
}

impl DeviceImage {
    pub fn new(width: u32, height: u32, payload: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            width,
            height,
            payload,
        }
    }

    /// Width in physical pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in physical pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for DeviceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// The capability set every paint target must provide.
///
/// The save/clip/transform model matches the usual immediate-mode 2D canvas:
/// `save` pushes the current transform and clip, `restore` pops them, and
/// clips only ever shrink the clip region.
pub trait Canvas {
    fn save(&mut self);
    /// Pushes a state like [`save`](Canvas::save) and additionally redirects
    /// drawing into a transparency layer composited with `paint` on restore.
    fn save_layer(&mut self, bounds: Option<Rect>, paint: &Paint);
    fn restore(&mut self);

    fn translate(&mut self, offset: Vec2);
    /// Concatenates `transform` onto the current transform.
    fn transform(&mut self, transform: Affine);
    /// Replaces the current transform outright.
    fn set_transform(&mut self, transform: Affine);
    fn current_transform(&self) -> Affine;

    fn clip_rect(&mut self, rect: Rect, anti_alias: bool);
    fn clip_rrect(&mut self, rrect: RoundedRect, anti_alias: bool);
    fn clip_path(&mut self, path: &BezPath, anti_alias: bool);
    /// Current clip as a device-space bounding rect.
    fn device_clip_bounds(&self) -> Rect;

    fn draw_rect(&mut self, rect: Rect, paint: &Paint);
    fn draw_picture(&mut self, picture: &Picture);
    /// Draws `image` scaled into `dst`, in the current transform space.
    fn draw_image(&mut self, image: &DeviceImage, dst: Rect, paint: &Paint);
    fn draw_text_blob(&mut self, blob: &TextBlob, origin: Point, paint: &Paint);
}

/// Handle to the device resources backing a frame.
///
/// May be absent entirely (headless or backgrounded), in which case raster
/// caching and deferred cleanup degrade to no-ops.
pub trait ResourceContext: Send + Sync {
    /// Rasterizes whatever `content` draws, under `transform`, into an
    /// offscreen image of `width` x `height` physical pixels.
    ///
    /// Returns `None` when the device cannot allocate the target; callers
    /// must fall back to replaying the content directly.
    fn rasterize(
        &self,
        width: u32,
        height: u32,
        transform: Affine,
        content: &mut dyn FnMut(&mut dyn Canvas),
    ) -> Option<DeviceImage>;

    /// Performs a batch of deferred resource cleanup after unrefs.
    fn perform_deferred_cleanup(&self);
}
