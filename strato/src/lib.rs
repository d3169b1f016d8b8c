// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Strato is a retained layer-tree compositor written in Rust.
//!
//! The UI side of an application builds a [`LayerTree`] per frame with
//! [`LayerTreeBuilder`], describing transforms, clips, opacity groups,
//! recorded [`Picture`]s, external textures and platform views. The tree is
//! handed to the raster side through a bounded [`Pipeline`], where a
//! [`Rasterizer`] walks it in two passes: *preroll* computes paint bounds,
//! feeds the [`RasterCache`] and announces platform views to an
//! [`ExternalViewEmbedder`]; *paint* then emits drawing commands to a
//! [`Canvas`].
//!
//! The raster cache turns repeatedly drawn content into device images so
//! later frames blit instead of replaying. Caching is transparent: with the
//! cache disabled the composited output is pixel-identical, only slower.
//!
//! ## Getting started
//!
//! ```
//! use strato::kurbo::{Affine, Rect, Size, Vec2};
//! use strato::{
//!     Canvas, CompositorContext, LayerTreeBuilder, Paint, PictureRecorder, SoftwareCanvas,
//! };
//!
//! // Record some content.
//! let mut recorder = PictureRecorder::new(Rect::new(0.0, 0.0, 100.0, 100.0));
//! recorder.draw_rect(Rect::new(10.0, 10.0, 90.0, 90.0), &Paint::default());
//!
//! // Build a frame's layer tree.
//! let mut builder = LayerTreeBuilder::new();
//! builder.push_clip_rect(
//!     Rect::new(0.0, 0.0, 100.0, 100.0),
//!     strato::ClipBehavior::HardEdge,
//! );
//! builder.add_picture(Vec2::ZERO, recorder.finish(), false, false);
//! builder.pop();
//! let mut tree = builder.build(Size::new(100.0, 100.0), 1.0);
//!
//! // Raster it.
//! let mut context = CompositorContext::default();
//! let mut canvas = SoftwareCanvas::new(100, 100);
//! let status = context
//!     .acquire_frame(&mut canvas, None, None, Affine::IDENTITY)
//!     .raster(&mut tree);
//! assert_eq!(status, strato::RasterStatus::Success);
//! ```
//!
//! Rendering backends integrate by implementing [`Canvas`] (the drawing
//! sink) and [`ResourceContext`] (offscreen rasterization for the cache).
//! The bundled [`SoftwareCanvas`] is a minimal CPU implementation used by
//! the tests and as a reference for backend authors.

#![warn(unused_crate_dependencies)]
#![warn(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(target_pointer_width = "64", warn(clippy::trivially_copy_pass_by_ref))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Not every public item is documented yet.
#![allow(missing_docs)]

mod canvas;
mod compositor;
mod embedder;
pub mod geometry;
mod layer;
mod picture;
mod pipeline;
mod pixmap;
mod raster_cache;
mod software;
mod task_runner;
mod texture;
mod unref_queue;

pub use peniko;
pub use peniko::kurbo;

use thiserror::Error as ThisError;

pub use canvas::{Canvas, DeviceImage, Paint, ResourceContext, TextBlob};
pub use compositor::{CompositorContext, RasterStatus, Rasterizer, ScopedFrame};
pub use embedder::{
    EmbeddedViewParams, ExternalViewEmbedder, Mutator, MutatorsStack, OverlayViewEmbedder,
    PostPrerollAction, SubmittedFrame, ViewId,
};
pub use layer::{
    ClipBehavior, LayerId, LayerKind, LayerTree, LayerTreeBuilder, PaintContext, PrerollContext,
};
pub use picture::{DrawOp, Picture, PictureId, PictureRecorder};
pub use pipeline::{
    Pipeline, PipelineConsumeResult, ProducerContinuation, DEFAULT_PIPELINE_DEPTH,
};
pub use pixmap::{Pixmap, PremulRgba8};
pub use raster_cache::{
    ContentId, RasterCache, RasterCacheConfig, RasterCacheKey, RasterCacheResult,
};
pub use software::{SoftwareCanvas, SoftwareContext};
pub use task_runner::{TaskRunner, TaskRunnerHandle};
pub use texture::{ExternalTexture, TextureId, TextureRegistry};
pub use unref_queue::UnrefQueue;

/// Errors that can occur in Strato.
#[derive(ThisError, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Posted a task to a [`TaskRunner`] whose thread has already shut down.
    #[error("task runner has shut down")]
    TaskRunnerShutDown,
}
