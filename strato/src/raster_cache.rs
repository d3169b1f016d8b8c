// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Bitmap cache for expensive pictures and layer subtrees.
//!
//! Entries are keyed by content identity plus a normalized transform
//! fingerprint. A cache hit substitutes a pre-rasterized image for a replay
//! of the original ops; a miss of any kind falls back to the replay, so the
//! cache can never change observable output, only cost.
//!
//! Transform normalization is deliberately lossy: unless fractional
//! translation support is enabled, the translation is snapped to whole
//! device pixels before both keying and rasterization. Two frames that
//! differ only by an integer-pixel pan (or a sub-pixel wiggle) then share
//! one entry, trading at most one pixel of positional error for a much
//! higher hit rate.

use std::collections::HashMap;

use peniko::kurbo::{Affine, Rect};

use crate::canvas::{Canvas, DeviceImage, Paint, ResourceContext};
use crate::geometry;
use crate::picture::{Picture, PictureId};

/// Identity of the cacheable content behind a cache entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ContentId {
    Picture(PictureId),
    /// A layer subtree, identified by the unique id of its root layer.
    Layer(u64),
}

/// Bit-exact fingerprint of a normalized transform.
///
/// Equality is on the 2x2 part plus the fractional translation; the
/// integral part of the translation never participates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TransformFingerprint {
    coeffs: [u64; 4],
    frac: [u64; 2],
}

fn canonical_bits(value: f64) -> u64 {
    // Collapse -0.0 and 0.0 so they key identically.
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

impl TransformFingerprint {
    fn new(normalized: Affine) -> Self {
        let [a, b, c, d, _, _] = normalized.as_coeffs();
        let frac = geometry::fractional_translation(normalized);
        Self {
            coeffs: [
                canonical_bits(a),
                canonical_bits(b),
                canonical_bits(c),
                canonical_bits(d),
            ],
            frac: [canonical_bits(frac.x), canonical_bits(frac.y)],
        }
    }
}

/// Composite cache key: content identity plus transform fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RasterCacheKey {
    pub content: ContentId,
    pub fingerprint: TransformFingerprint,
}

/// Tunables for the cache policy.
///
/// The defaults mirror empirically useful values, but none of them are
/// correctness requirements; hosts are expected to tune them.
#[derive(Clone, Copy, Debug)]
pub struct RasterCacheConfig {
    /// A picture is rasterized once it has been prerolled this many times.
    pub access_threshold: usize,
    /// Upper bound on new picture rasterizations per frame, to keep a cold
    /// scroll from stalling a single frame on cache fills.
    pub picture_cache_limit_per_frame: usize,
    /// When false, translations are snapped to whole pixels for both keying
    /// and rasterization.
    pub support_fractional_translation: bool,
    /// Entries unused for this many frames are evicted by the sweep.
    pub stale_frame_limit: u64,
    /// Pictures with at most this many ops are never worth caching.
    pub minimum_op_count: usize,
}

impl Default for RasterCacheConfig {
    fn default() -> Self {
        Self {
            access_threshold: 3,
            picture_cache_limit_per_frame: 3,
            support_fractional_translation: false,
            stale_frame_limit: 1,
            minimum_op_count: 5,
        }
    }
}

/// A successful cache lookup, ready to be drawn in place of the content.
#[derive(Clone, Debug)]
pub struct RasterCacheResult {
    image: DeviceImage,
    logical_rect: Rect,
    support_fractional_translation: bool,
}

impl RasterCacheResult {
    /// Draws the cached image where the content would have painted under
    /// the canvas's current transform.
    ///
    /// The destination is recomputed from the live transform rather than
    /// remembered from rasterization time, so one entry serves every
    /// integer-pixel placement of the same content.
    pub fn draw(&self, canvas: &mut dyn Canvas, paint: Option<&Paint>) {
        let transform = self.normalize(canvas.current_transform());
        let device = geometry::transformed_bounds(transform, self.logical_rect).expand();
        if geometry::rect_is_empty(device) {
            return;
        }
        let dst = Rect::new(
            device.x0,
            device.y0,
            device.x0 + self.image.width() as f64,
            device.y0 + self.image.height() as f64,
        );
        let default_paint = Paint::default();
        canvas.save();
        canvas.set_transform(Affine::IDENTITY);
        canvas.draw_image(&self.image, dst, paint.unwrap_or(&default_paint));
        canvas.restore();
    }

    pub fn image(&self) -> &DeviceImage {
        &self.image
    }

    fn normalize(&self, transform: Affine) -> Affine {
        if self.support_fractional_translation {
            transform
        } else {
            geometry::integral_transform(transform)
        }
    }
}

struct Entry {
    access_count: usize,
    last_used_frame: u64,
    image: Option<RasterCacheResult>,
}

/// The raster cache.
///
/// Mutated exclusively from the raster thread; usage marking happens in the
/// preroll pass (`prepare_*`), so lookups during paint take `&self`.
pub struct RasterCache {
    config: RasterCacheConfig,
    frame_number: u64,
    pictures_cached_this_frame: usize,
    cache: HashMap<RasterCacheKey, Entry>,
}

impl RasterCache {
    pub fn new(config: RasterCacheConfig) -> Self {
        Self {
            config,
            frame_number: 0,
            pictures_cached_this_frame: 0,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RasterCacheConfig {
        &self.config
    }

    /// Number of live entries, cached or still counting accesses.
    pub fn entry_count(&self) -> usize {
        self.cache.len()
    }

    /// Number of entries holding a rasterized image.
    pub fn image_count(&self) -> usize {
        self.cache.values().filter(|e| e.image.is_some()).count()
    }

    /// Starts a new frame's bookkeeping.
    pub fn mark_frame_start(&mut self) {
        self.frame_number += 1;
        self.pictures_cached_this_frame = 0;
    }

    fn normalize(&self, transform: Affine) -> Affine {
        if self.config.support_fractional_translation {
            transform
        } else {
            geometry::integral_transform(transform)
        }
    }

    fn key_for(&self, content: ContentId, transform: Affine) -> RasterCacheKey {
        RasterCacheKey {
            content,
            fingerprint: TransformFingerprint::new(self.normalize(transform)),
        }
    }

    fn worth_rasterizing(&self, picture: &Picture, is_complex: bool) -> bool {
        is_complex || picture.op_count() > self.config.minimum_op_count
    }

    fn rasterize(
        resource_context: &dyn ResourceContext,
        normalized: Affine,
        logical_rect: Rect,
        support_fractional_translation: bool,
        content: &mut dyn FnMut(&mut dyn Canvas),
    ) -> Option<RasterCacheResult> {
        let device = geometry::transformed_bounds(normalized, logical_rect).expand();
        if geometry::rect_is_empty(device) {
            return None;
        }
        let width = device.width() as u32;
        let height = device.height() as u32;
        // Shift so the content's device bounds land at the image origin.
        let offset = Affine::translate((-device.x0, -device.y0));
        let image = resource_context.rasterize(width, height, offset * normalized, content)?;
        Some(RasterCacheResult {
            image,
            logical_rect,
            support_fractional_translation,
        })
    }

    /// Registers one preroll-time access of `picture` under `transform` and
    /// rasterizes it once the access threshold is crossed.
    ///
    /// Returns true if the picture is cached (now or already) for this
    /// transform.
    pub fn prepare_picture(
        &mut self,
        resource_context: Option<&dyn ResourceContext>,
        picture: &Picture,
        transform: Affine,
        is_complex: bool,
        will_change: bool,
    ) -> bool {
        if will_change || !self.worth_rasterizing(picture, is_complex) {
            return false;
        }
        let key = self.key_for(ContentId::Picture(picture.id()), transform);
        let frame_number = self.frame_number;
        let entry = self.cache.entry(key).or_insert(Entry {
            access_count: 0,
            last_used_frame: frame_number,
            image: None,
        });
        entry.access_count += 1;
        entry.last_used_frame = frame_number;
        if entry.image.is_some() {
            return true;
        }
        if entry.access_count < self.config.access_threshold {
            return false;
        }
        if self.pictures_cached_this_frame >= self.config.picture_cache_limit_per_frame {
            return false;
        }
        let Some(resource_context) = resource_context else {
            return false;
        };
        let normalized = self.normalize(transform);
        let rasterized = Self::rasterize(
            resource_context,
            normalized,
            picture.cull_rect(),
            self.config.support_fractional_translation,
            &mut |canvas| picture.replay(canvas),
        );
        match rasterized {
            Some(result) => {
                log::debug!("cached picture {:?}", picture.id());
                // Entry may have been touched through `self` borrows above;
                // re-fetch rather than hold the borrow across rasterize.
                if let Some(entry) = self.cache.get_mut(&key) {
                    entry.image = Some(result);
                }
                self.pictures_cached_this_frame += 1;
                true
            }
            None => false,
        }
    }

    /// Caches the painted output of a layer subtree under `transform`.
    ///
    /// Layer caching is driven by the owning layer (e.g. an opacity layer
    /// with a single child), which decides per frame whether the subtree is
    /// a caching candidate, so no access threshold applies here.
    pub fn prepare_layer(
        &mut self,
        resource_context: Option<&dyn ResourceContext>,
        layer_id: u64,
        transform: Affine,
        bounds: Rect,
        paint_subtree: &mut dyn FnMut(&mut dyn Canvas),
    ) -> bool {
        let key = self.key_for(ContentId::Layer(layer_id), transform);
        let frame_number = self.frame_number;
        let entry = self.cache.entry(key).or_insert(Entry {
            access_count: 0,
            last_used_frame: frame_number,
            image: None,
        });
        entry.access_count += 1;
        entry.last_used_frame = frame_number;
        if entry.image.is_some() {
            return true;
        }
        let Some(resource_context) = resource_context else {
            return false;
        };
        let normalized = self.normalize(transform);
        let rasterized = Self::rasterize(
            resource_context,
            normalized,
            bounds,
            self.config.support_fractional_translation,
            paint_subtree,
        );
        match rasterized {
            Some(result) => {
                log::debug!("cached layer subtree {layer_id}");
                if let Some(entry) = self.cache.get_mut(&key) {
                    entry.image = Some(result);
                }
                true
            }
            None => false,
        }
    }

    /// Looks up a cached image for `content` under `transform`.
    ///
    /// `None` means miss; the caller replays the original source. A miss is
    /// a normal outcome, never an error.
    pub fn get(&self, content: ContentId, transform: Affine) -> Option<RasterCacheResult> {
        let key = self.key_for(content, transform);
        self.cache.get(&key).and_then(|e| e.image.clone())
    }

    /// Evicts entries that have not been prepared recently.
    ///
    /// Run once per frame after paint; with the default `stale_frame_limit`
    /// of 1 this keeps exactly the entries touched during this frame's
    /// preroll.
    pub fn sweep_after_frame(&mut self) {
        let frame = self.frame_number;
        let limit = self.config.stale_frame_limit;
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| frame.saturating_sub(entry.last_used_frame) < limit);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            log::debug!("raster cache sweep evicted {evicted} of {before} entries");
        }
    }

    /// Drops every entry. Required when the owning device context is
    /// destroyed: the cached images are device-resident and now invalid.
    pub fn clear(&mut self) {
        if !self.cache.is_empty() {
            log::debug!("raster cache cleared ({} entries)", self.cache.len());
        }
        self.cache.clear();
    }
}

impl Default for RasterCache {
    fn default() -> Self {
        Self::new(RasterCacheConfig::default())
    }
}
