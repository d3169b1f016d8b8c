// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame orchestration on the raster thread.
//!
//! [`CompositorContext`] owns the state that persists across frames: the
//! raster cache and the texture registry. [`CompositorContext::acquire_frame`]
//! borrows it together with the frame's canvas and embedder into a
//! [`ScopedFrame`], whose [`raster`](ScopedFrame::raster) runs the full
//! sequence for one tree: begin the embedder frame, preroll, populate layer
//! caches, paint, submit, sweep.
//!
//! [`Rasterizer`] sits on top and pulls trees from a [`Pipeline`].

use std::cell::Cell;

use peniko::kurbo::Affine;

use crate::canvas::{Canvas, ResourceContext};
use crate::embedder::{ExternalViewEmbedder, PostPrerollAction};
use crate::layer::{LayerTree, PaintContext, PrerollContext};
use crate::pipeline::{Pipeline, DEFAULT_PIPELINE_DEPTH};
use crate::raster_cache::{RasterCache, RasterCacheConfig};
use crate::texture::TextureRegistry;
use crate::unref_queue::UnrefQueue;

/// Outcome of rasterizing one layer tree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RasterStatus {
    /// The frame was painted and submitted.
    Success,
    /// The embedder asked for the same tree to be tried again; it has been
    /// requeued and nothing was painted.
    Resubmit,
    /// The tree had no visible content; nothing was painted.
    Skipped,
}

/// Cross-frame compositor state, owned by the raster thread.
///
/// Deliberately not `Sync`: everything here belongs to one thread.
pub struct CompositorContext {
    raster_cache: RasterCache,
    texture_registry: TextureRegistry,
    frame_number: Cell<u64>,
}

static_assertions::assert_impl_all!(CompositorContext: Send);
static_assertions::assert_not_impl_any!(CompositorContext: Sync);

impl CompositorContext {
    pub fn new(cache_config: RasterCacheConfig) -> Self {
        Self {
            raster_cache: RasterCache::new(cache_config),
            texture_registry: TextureRegistry::new(),
            frame_number: Cell::new(0),
        }
    }

    pub fn raster_cache(&self) -> &RasterCache {
        &self.raster_cache
    }

    pub fn raster_cache_mut(&mut self) -> &mut RasterCache {
        &mut self.raster_cache
    }

    pub fn texture_registry(&self) -> &TextureRegistry {
        &self.texture_registry
    }

    pub fn texture_registry_mut(&mut self) -> &mut TextureRegistry {
        &mut self.texture_registry
    }

    /// Number of frames rastered so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number.get()
    }

    /// Reacts to the device context being lost: cached images are invalid
    /// and every registered texture is told to release device resources.
    pub fn on_context_destroyed(&mut self) {
        log::info!("device context destroyed, dropping raster cache");
        self.raster_cache.clear();
        self.texture_registry.on_context_destroyed();
    }

    /// Borrows everything needed to raster one frame.
    ///
    /// `root_transform` maps the tree's logical space to device pixels,
    /// typically a device-pixel-ratio scale.
    pub fn acquire_frame<'a, 'b>(
        &'a mut self,
        canvas: &'a mut (dyn Canvas + 'b),
        resource_context: Option<&'a dyn ResourceContext>,
        view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
        root_transform: Affine,
    ) -> ScopedFrame<'a, 'b> {
        ScopedFrame {
            context: self,
            canvas,
            resource_context,
            view_embedder,
            root_transform,
        }
    }
}

impl Default for CompositorContext {
    fn default() -> Self {
        Self::new(RasterCacheConfig::default())
    }
}

/// One frame's borrow of the compositor context and output surface.
pub struct ScopedFrame<'a, 'b> {
    context: &'a mut CompositorContext,
    canvas: &'a mut (dyn Canvas + 'b),
    resource_context: Option<&'a dyn ResourceContext>,
    view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
    root_transform: Affine,
}

impl ScopedFrame<'_, '_> {
    /// Runs the full raster sequence for `tree`.
    pub fn raster(mut self, tree: &mut LayerTree) -> RasterStatus {
        let frame = self.context.frame_number.get() + 1;
        self.context.frame_number.set(frame);
        self.context.raster_cache.mark_frame_start();

        if let Some(embedder) = self.view_embedder.as_deref_mut() {
            embedder.begin_frame(tree.frame_size(), tree.device_pixel_ratio());
        }

        let has_platform_views = {
            let mut preroll = PrerollContext::new(
                Some(&mut self.context.raster_cache),
                self.resource_context,
                self.view_embedder.as_deref_mut(),
            );
            tree.preroll(&mut preroll, self.root_transform);
            preroll.has_platform_views
        };

        if has_platform_views {
            if let Some(embedder) = self.view_embedder.as_deref_mut() {
                if embedder.post_preroll_action() == PostPrerollAction::ResubmitFrame {
                    log::debug!("frame {frame}: embedder requested resubmit");
                    embedder.cancel_frame();
                    return RasterStatus::Resubmit;
                }
            }
        }

        if !tree.needs_painting(tree.root()) && !has_platform_views {
            log::trace!("frame {frame}: nothing to paint");
            if let Some(embedder) = self.view_embedder.as_deref_mut() {
                embedder.cancel_frame();
            }
            self.context.raster_cache.sweep_after_frame();
            return RasterStatus::Skipped;
        }

        tree.prepare_layer_caches(
            &mut self.context.raster_cache,
            self.resource_context,
            Some(&self.context.texture_registry),
            self.root_transform,
        );

        self.canvas.save();
        self.canvas.transform(self.root_transform);
        {
            let mut paint = PaintContext::new(
                self.canvas,
                Some(&self.context.raster_cache),
                Some(&self.context.texture_registry),
                self.view_embedder.as_deref_mut(),
            );
            tree.paint(&mut paint);
        }
        self.canvas.restore();

        if let Some(embedder) = self.view_embedder.as_deref_mut() {
            if !embedder.submit_frame() {
                log::warn!("frame {frame}: embedder failed to present");
            }
        }

        self.context.raster_cache.sweep_after_frame();
        RasterStatus::Success
    }
}

/// Pulls layer trees off a [`Pipeline`] and rasters them.
pub struct Rasterizer {
    context: CompositorContext,
    pipeline: Pipeline<LayerTree>,
    unref_queue: Option<UnrefQueue>,
}

impl Rasterizer {
    pub fn new(cache_config: RasterCacheConfig) -> Self {
        Self {
            context: CompositorContext::new(cache_config),
            pipeline: Pipeline::new(DEFAULT_PIPELINE_DEPTH),
            unref_queue: None,
        }
    }

    /// The producer endpoint for the UI side.
    pub fn pipeline(&self) -> Pipeline<LayerTree> {
        self.pipeline.clone()
    }

    pub fn context(&self) -> &CompositorContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut CompositorContext {
        &mut self.context
    }

    /// Installs the queue that collects resources released during frames.
    pub fn set_unref_queue(&mut self, queue: UnrefQueue) {
        self.unref_queue = Some(queue);
    }

    /// Rasters the oldest queued tree, if any.
    ///
    /// A tree the embedder bounces with
    /// [`PostPrerollAction::ResubmitFrame`] goes back to the front of the
    /// pipeline so the next call retries it before anything newer.
    pub fn draw_frame<'a>(
        &mut self,
        canvas: &'a mut dyn Canvas,
        resource_context: Option<&dyn ResourceContext>,
        mut view_embedder: Option<&'a mut dyn ExternalViewEmbedder>,
        root_transform: Affine,
    ) -> Option<RasterStatus> {
        let context = &mut self.context;
        let pipeline = &self.pipeline;
        let mut status = None;
        pipeline.consume(|mut tree| {
            let result = context
                .acquire_frame(
                    canvas,
                    resource_context,
                    view_embedder.as_deref_mut(),
                    root_transform,
                )
                .raster(&mut tree);
            if result == RasterStatus::Resubmit {
                pipeline.produce_to_front().complete(tree);
            }
            status = Some(result);
        });
        status
    }

    /// Tears down device state: drains pending unrefs and invalidates the
    /// compositor context.
    pub fn teardown(&mut self) {
        if let Some(queue) = &self.unref_queue {
            queue.drain();
        }
        self.context.on_context_destroyed();
    }
}
