// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-frame layer tree.
//!
//! A [`LayerTree`] is built on the UI thread once per frame, handed to the
//! raster thread through the pipeline, and walked there in two passes:
//! [`preroll`](LayerTree::preroll) computes paint bounds, feeds the raster
//! cache's access counters and announces platform views to the embedder;
//! [`paint`](LayerTree::paint) then emits drawing commands. Both passes
//! visit children in insertion order, which is paint order (back to front).
//!
//! Nodes live in an arena indexed by [`LayerId`]; parent links are indices,
//! so replacing a subtree between frames cannot dangle.

use std::sync::atomic::{AtomicU64, Ordering};

use peniko::kurbo::{Affine, BezPath, Rect, RoundedRect, Size, Vec2};
use smallvec::SmallVec;

use crate::canvas::{Canvas, Paint, ResourceContext};
use crate::embedder::{
    EmbeddedViewParams, ExternalViewEmbedder, Mutator, MutatorsStack, ViewId,
};
use crate::geometry;
use crate::picture::Picture;
use crate::raster_cache::{ContentId, RasterCache};
use crate::texture::{TextureId, TextureRegistry};

/// Index of a node in its [`LayerTree`]'s arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LayerId(u32);

/// How a clip layer treats its boundary.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ClipBehavior {
    /// Pixel-snapped clip, no anti-aliasing, no extra layer.
    HardEdge,
    /// Anti-aliased clip edge.
    AntiAlias,
    /// Anti-aliased edge plus a transparency layer around the children, so
    /// children overlapping the boundary blend once instead of twice.
    AntiAliasWithSaveLayer,
}

impl ClipBehavior {
    fn anti_alias(self) -> bool {
        !matches!(self, Self::HardEdge)
    }

    fn uses_save_layer(self) -> bool {
        matches!(self, Self::AntiAliasWithSaveLayer)
    }
}

/// What a layer node is.
#[derive(Clone, Debug)]
pub enum LayerKind {
    /// Groups children with no effect of its own.
    Container,
    /// Applies a transform to its children.
    Transform(Affine),
    ClipRect {
        rect: Rect,
        behavior: ClipBehavior,
    },
    ClipRRect {
        rrect: RoundedRect,
        behavior: ClipBehavior,
    },
    ClipPath {
        path: BezPath,
        behavior: ClipBehavior,
    },
    /// Modulates descendant alpha, offset by `offset` first.
    Opacity {
        alpha: u8,
        offset: Vec2,
    },
    /// Replays a recorded picture at `offset`.
    Picture {
        picture: Picture,
        offset: Vec2,
        /// Hint: expensive to replay, cache even if the op count is small.
        is_complex: bool,
        /// Hint: content changes every frame, never cache.
        will_change: bool,
    },
    /// Draws externally produced content from the texture registry.
    Texture {
        id: TextureId,
        rect: Rect,
        freeze: bool,
    },
    /// Reserves space for a platform-native view.
    PlatformView {
        id: ViewId,
        rect: Rect,
    },
}

impl LayerKind {
    /// Container kinds accept children; leaves do not.
    fn is_container(&self) -> bool {
        !matches!(
            self,
            Self::Picture { .. } | Self::Texture { .. } | Self::PlatformView { .. }
        )
    }
}

struct LayerNode {
    kind: LayerKind,
    parent: Option<LayerId>,
    children: SmallVec<[LayerId; 4]>,
    /// Identity used for raster-cache keys; unique per node instance.
    unique_id: u64,
    /// Bounds in the parent's coordinate space, set by preroll.
    paint_bounds: Rect,
    /// Bounds in device space after clipping, set by preroll. Empty means
    /// the node does not need painting this frame.
    device_bounds: Rect,
    /// True when the subtree embeds content that must not be flattened
    /// into a cached bitmap (platform views, live textures).
    subtree_uncacheable: bool,
    /// True when compositing this node requires the system compositor.
    needs_system_composite: bool,
}

fn next_unique_id() -> u64 {
    static ID_COUNTER: AtomicU64 = AtomicU64::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

impl LayerNode {
    fn new(kind: LayerKind, parent: Option<LayerId>) -> Self {
        Self {
            kind,
            parent,
            children: SmallVec::new(),
            unique_id: next_unique_id(),
            paint_bounds: Rect::ZERO,
            device_bounds: Rect::ZERO,
            subtree_uncacheable: false,
            needs_system_composite: false,
        }
    }
}

/// Builds a [`LayerTree`] with push/pop nesting.
///
/// `push_*` opens a container that subsequent layers become children of;
/// [`pop`](Self::pop) closes it. `add_*` appends a leaf to the currently
/// open container. The builder starts inside an implicit root container.
pub struct LayerTreeBuilder {
    nodes: Vec<LayerNode>,
    stack: SmallVec<[LayerId; 8]>,
}

impl LayerTreeBuilder {
    pub fn new() -> Self {
        let root = LayerNode::new(LayerKind::Container, None);
        Self {
            nodes: vec![root],
            stack: SmallVec::from_slice(&[LayerId(0)]),
        }
    }

    fn current(&self) -> LayerId {
        *self.stack.last().unwrap()
    }

    fn insert(&mut self, kind: LayerKind) -> LayerId {
        let parent = self.current();
        let id = LayerId(self.nodes.len() as u32);
        self.nodes.push(LayerNode::new(kind, Some(parent)));
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    fn push(&mut self, kind: LayerKind) -> LayerId {
        debug_assert!(kind.is_container(), "pushed a leaf kind");
        let id = self.insert(kind);
        self.stack.push(id);
        id
    }

    pub fn push_container(&mut self) -> LayerId {
        self.push(LayerKind::Container)
    }

    pub fn push_transform(&mut self, transform: Affine) -> LayerId {
        self.push(LayerKind::Transform(transform))
    }

    pub fn push_clip_rect(&mut self, rect: Rect, behavior: ClipBehavior) -> LayerId {
        self.push(LayerKind::ClipRect { rect, behavior })
    }

    pub fn push_clip_rrect(&mut self, rrect: RoundedRect, behavior: ClipBehavior) -> LayerId {
        self.push(LayerKind::ClipRRect { rrect, behavior })
    }

    pub fn push_clip_path(&mut self, path: BezPath, behavior: ClipBehavior) -> LayerId {
        self.push(LayerKind::ClipPath { path, behavior })
    }

    pub fn push_opacity(&mut self, alpha: u8, offset: Vec2) -> LayerId {
        self.push(LayerKind::Opacity { alpha, offset })
    }

    pub fn add_picture(
        &mut self,
        offset: Vec2,
        picture: Picture,
        is_complex: bool,
        will_change: bool,
    ) -> LayerId {
        self.insert(LayerKind::Picture {
            picture,
            offset,
            is_complex,
            will_change,
        })
    }

    pub fn add_texture(&mut self, id: TextureId, rect: Rect, freeze: bool) -> LayerId {
        self.insert(LayerKind::Texture { id, rect, freeze })
    }

    pub fn add_platform_view(&mut self, id: ViewId, rect: Rect) -> LayerId {
        self.insert(LayerKind::PlatformView { id, rect })
    }

    /// Closes the most recently pushed container.
    ///
    /// Popping past the root is a programmer error: debug assert, no-op in
    /// release.
    pub fn pop(&mut self) {
        if self.stack.len() <= 1 {
            debug_assert!(false, "pop without matching push");
            return;
        }
        self.stack.pop();
    }

    /// Finishes the tree for a frame of `frame_size` physical pixels.
    ///
    /// Containers left open are implicitly closed.
    pub fn build(mut self, frame_size: Size, device_pixel_ratio: f64) -> LayerTree {
        debug_assert!(self.stack.len() == 1, "unbalanced push at build time");
        self.stack.truncate(1);
        LayerTree {
            nodes: self.nodes,
            root: LayerId(0),
            frame_size,
            device_pixel_ratio,
        }
    }
}

impl Default for LayerTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared across a preroll pass.
///
/// The embedder borrow carries its own trait-object lifetime so a caller
/// can lend the embedder for just this pass and reuse it afterwards.
pub struct PrerollContext<'a, 'b> {
    pub raster_cache: Option<&'a mut RasterCache>,
    pub resource_context: Option<&'a dyn ResourceContext>,
    pub view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
    /// Set when the tree contains at least one platform view; the
    /// rasterizer uses this to decide whether the embedder must be driven
    /// through submit/cancel for this frame.
    pub has_platform_views: bool,
}

impl<'a, 'b> PrerollContext<'a, 'b> {
    pub fn new(
        raster_cache: Option<&'a mut RasterCache>,
        resource_context: Option<&'a dyn ResourceContext>,
        view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
    ) -> Self {
        Self {
            raster_cache,
            resource_context,
            view_embedder,
            has_platform_views: false,
        }
    }
}

/// Walk-local preroll state, saved and restored around container children.
struct PrerollState {
    cull_rect: Rect,
    mutators: MutatorsStack,
}

/// State shared across a paint pass.
pub struct PaintContext<'a, 'b> {
    surface_canvas: &'a mut (dyn Canvas + 'b),
    pub raster_cache: Option<&'a RasterCache>,
    pub texture_registry: Option<&'a TextureRegistry>,
    pub view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
    /// Once a platform view has been composited, subsequent leaf content
    /// paints into that view's overlay canvas instead of the surface.
    active_view: Option<ViewId>,
}

impl<'a, 'b> PaintContext<'a, 'b> {
    pub fn new(
        surface_canvas: &'a mut (dyn Canvas + 'b),
        raster_cache: Option<&'a RasterCache>,
        texture_registry: Option<&'a TextureRegistry>,
        view_embedder: Option<&'a mut (dyn ExternalViewEmbedder + 'b)>,
    ) -> Self {
        Self {
            surface_canvas,
            raster_cache,
            texture_registry,
            view_embedder,
            active_view: None,
        }
    }

    /// The canvas leaf content should currently paint into.
    pub fn canvas(&mut self) -> &mut dyn Canvas {
        self.canvas_for(self.active_view)
    }

    /// The canvas for a specific redirect target. Bracketing ops (restore
    /// after save) resolve against the target captured at save time, not
    /// the current one, so compositing a platform view among the children
    /// cannot unbalance the enclosing canvas.
    fn canvas_for(&mut self, view: Option<ViewId>) -> &mut dyn Canvas {
        match (view, &mut self.view_embedder) {
            (Some(view), Some(embedder)) => embedder.composite_embedded_view(view),
            _ => &mut *self.surface_canvas,
        }
    }
}

/// A frame's worth of layers, ready for the raster thread.
pub struct LayerTree {
    nodes: Vec<LayerNode>,
    root: LayerId,
    frame_size: Size,
    device_pixel_ratio: f64,
}

static_assertions::assert_impl_all!(LayerTree: Send);

impl LayerTree {
    pub fn root(&self) -> LayerId {
        self.root
    }

    /// Target size in physical pixels.
    pub fn frame_size(&self) -> Size {
        self.frame_size
    }

    pub fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio
    }

    pub fn kind(&self, id: LayerId) -> &LayerKind {
        &self.nodes[id.0 as usize].kind
    }

    pub fn children(&self, id: LayerId) -> &[LayerId] {
        &self.nodes[id.0 as usize].children
    }

    pub fn parent(&self, id: LayerId) -> Option<LayerId> {
        self.nodes[id.0 as usize].parent
    }

    /// Bounds in the parent's space, valid after preroll.
    pub fn paint_bounds(&self, id: LayerId) -> Rect {
        self.nodes[id.0 as usize].paint_bounds
    }

    /// True when the node has visible content this frame.
    pub fn needs_painting(&self, id: LayerId) -> bool {
        !geometry::rect_is_empty(self.nodes[id.0 as usize].device_bounds)
    }

    pub fn needs_system_composite(&self, id: LayerId) -> bool {
        self.nodes[id.0 as usize].needs_system_composite
    }

    fn node(&self, id: LayerId) -> &LayerNode {
        &self.nodes[id.0 as usize]
    }

    /// First pass: computes paint bounds for every node, announces platform
    /// views, and feeds the raster cache's access counters.
    ///
    /// `root_transform` is the device transform of the frame, typically a
    /// device-pixel-ratio scale. Returns the root's paint bounds.
    pub fn preroll(&mut self, ctx: &mut PrerollContext<'_, '_>, root_transform: Affine) -> Rect {
        let mut state = PrerollState {
            cull_rect: self.frame_size.to_rect(),
            mutators: MutatorsStack::new(),
        };
        let root = self.root;
        self.preroll_node(root, ctx, root_transform, &mut state)
    }

    fn preroll_node(
        &mut self,
        id: LayerId,
        ctx: &mut PrerollContext<'_, '_>,
        matrix: Affine,
        state: &mut PrerollState,
    ) -> Rect {
        // Clone out the kind so the arena can be mutated while recursing.
        let kind = self.node(id).kind.clone();
        let (bounds, uncacheable) = match kind {
            LayerKind::Container => self.preroll_children(id, ctx, matrix, state),
            LayerKind::Transform(transform) => {
                if !transform.is_finite() {
                    // Degenerate matrices cull the subtree instead of
                    // spreading NaN through the bounds unions.
                    (Rect::ZERO, false)
                } else {
                    state.mutators.push(Mutator::Transform(transform));
                    let (child_bounds, uncacheable) =
                        self.preroll_children(id, ctx, matrix * transform, state);
                    state.mutators.pop();
                    (geometry::transformed_bounds(transform, child_bounds), uncacheable)
                }
            }
            LayerKind::ClipRect { rect, behavior: _ } => {
                self.preroll_clip(id, ctx, matrix, state, rect, Mutator::ClipRect(rect))
            }
            LayerKind::ClipRRect { rrect, behavior: _ } => self.preroll_clip(
                id,
                ctx,
                matrix,
                state,
                rrect.rect(),
                Mutator::ClipRRect(rrect),
            ),
            LayerKind::ClipPath { ref path, behavior: _ } => {
                use peniko::kurbo::Shape;
                self.preroll_clip(
                    id,
                    ctx,
                    matrix,
                    state,
                    path.bounding_box(),
                    Mutator::ClipPath(path.clone()),
                )
            }
            LayerKind::Opacity { alpha, offset } => {
                state.mutators.push(Mutator::Opacity(alpha));
                let (child_bounds, uncacheable) =
                    self.preroll_children(id, ctx, matrix * Affine::translate(offset), state);
                state.mutators.pop();
                (
                    geometry::transformed_bounds(Affine::translate(offset), child_bounds),
                    uncacheable,
                )
            }
            LayerKind::Picture {
                ref picture,
                offset,
                is_complex,
                will_change,
            } => {
                let picture_matrix = matrix * Affine::translate(offset);
                if let Some(cache) = ctx.raster_cache.as_deref_mut() {
                    cache.prepare_picture(
                        ctx.resource_context,
                        picture,
                        picture_matrix,
                        is_complex,
                        will_change,
                    );
                }
                (
                    geometry::transformed_bounds(
                        Affine::translate(offset),
                        picture.cull_rect(),
                    ),
                    false,
                )
            }
            LayerKind::Texture { rect, .. } => (rect, true),
            LayerKind::PlatformView { id: view_id, rect } => {
                ctx.has_platform_views = true;
                self.nodes[id.0 as usize].needs_system_composite = true;
                if let Some(embedder) = ctx.view_embedder.as_deref_mut() {
                    let device = geometry::transformed_bounds(matrix, rect);
                    let mut mutators = state.mutators.clone();
                    mutators.push(Mutator::Transform(matrix));
                    embedder.preroll_composite_embedded_view(
                        view_id,
                        EmbeddedViewParams {
                            offset: device.origin(),
                            size: device.size(),
                            mutators,
                        },
                    );
                }
                (rect, true)
            }
        };
        let node = &mut self.nodes[id.0 as usize];
        node.paint_bounds = bounds;
        node.subtree_uncacheable = uncacheable;
        node.device_bounds = geometry::intersect_paint_bounds(
            geometry::transformed_bounds(matrix, bounds),
            state.cull_rect,
        );
        bounds
    }

    /// Prerolls children under `matrix`, in insertion order. Returns their
    /// union in the caller's inner space plus the uncacheable flag.
    fn preroll_children(
        &mut self,
        id: LayerId,
        ctx: &mut PrerollContext<'_, '_>,
        matrix: Affine,
        state: &mut PrerollState,
    ) -> (Rect, bool) {
        let children: SmallVec<[LayerId; 4]> = self.node(id).children.clone();
        let mut bounds = Rect::ZERO;
        let mut uncacheable = false;
        for child in children {
            let child_bounds = self.preroll_node(child, ctx, matrix, state);
            bounds = geometry::union_paint_bounds(bounds, child_bounds);
            uncacheable |= self.node(child).subtree_uncacheable;
        }
        (bounds, uncacheable)
    }

    fn preroll_clip(
        &mut self,
        id: LayerId,
        ctx: &mut PrerollContext<'_, '_>,
        matrix: Affine,
        state: &mut PrerollState,
        clip_bounds: Rect,
        mutator: Mutator,
    ) -> (Rect, bool) {
        let saved_cull = state.cull_rect;
        state.cull_rect = geometry::intersect_paint_bounds(
            state.cull_rect,
            geometry::transformed_bounds(matrix, clip_bounds),
        );
        state.mutators.push(mutator);
        let (child_bounds, uncacheable) = self.preroll_children(id, ctx, matrix, state);
        state.mutators.pop();
        state.cull_rect = saved_cull;
        (
            geometry::intersect_paint_bounds(child_bounds, clip_bounds),
            uncacheable,
        )
    }

    /// Caching pass for layer subtrees, run between preroll and paint.
    ///
    /// Currently this serves opacity layers with a single non-picture
    /// child: the child subtree is rasterized without the alpha so paint
    /// can draw the cached image with the alpha applied. Subtrees that
    /// embed platform views or live textures are skipped.
    pub fn prepare_layer_caches(
        &self,
        cache: &mut RasterCache,
        resource_context: Option<&dyn ResourceContext>,
        texture_registry: Option<&TextureRegistry>,
        root_transform: Affine,
    ) {
        self.prepare_layer_caches_node(
            self.root,
            cache,
            resource_context,
            texture_registry,
            root_transform,
        );
    }

    fn prepare_layer_caches_node(
        &self,
        id: LayerId,
        cache: &mut RasterCache,
        resource_context: Option<&dyn ResourceContext>,
        texture_registry: Option<&TextureRegistry>,
        matrix: Affine,
    ) {
        let node = self.node(id);
        let child_matrix = match &node.kind {
            LayerKind::Transform(t) => matrix * *t,
            LayerKind::Opacity { alpha: _, offset } => {
                let child_matrix = matrix * Affine::translate(*offset);
                if let Some(&child) = self.opacity_cache_candidate(id) {
                    let child_node = self.node(child);
                    if self.needs_painting(child)
                        && !matches!(child_node.kind, LayerKind::Picture { .. })
                    {
                        cache.prepare_layer(
                            resource_context,
                            child_node.unique_id,
                            child_matrix,
                            child_node.paint_bounds,
                            &mut |canvas| {
                                let mut ctx = PaintContext::new(
                                    canvas,
                                    None,
                                    texture_registry,
                                    None,
                                );
                                self.paint_node(child, &mut ctx);
                            },
                        );
                    }
                }
                child_matrix
            }
            _ => matrix,
        };
        for &child in &node.children {
            self.prepare_layer_caches_node(
                child,
                cache,
                resource_context,
                texture_registry,
                child_matrix,
            );
        }
    }

    /// The single child an opacity layer may substitute with a cached
    /// image, if caching it is legal. More than one child makes the
    /// substitution ambiguous and disables it.
    fn opacity_cache_candidate(&self, id: LayerId) -> Option<&LayerId> {
        let node = self.node(id);
        debug_assert!(matches!(node.kind, LayerKind::Opacity { .. }));
        match &node.children[..] {
            [child] if !self.node(*child).subtree_uncacheable => Some(child),
            _ => None,
        }
    }

    /// Second pass: emits drawing commands for every visible node.
    ///
    /// Requires a completed preroll for this frame. The root transform must
    /// already be applied to `ctx`'s surface canvas by the caller.
    pub fn paint(&self, ctx: &mut PaintContext<'_, '_>) {
        if self.needs_painting(self.root) {
            self.paint_node(self.root, ctx);
        }
    }

    fn paint_node(&self, id: LayerId, ctx: &mut PaintContext<'_, '_>) {
        debug_assert!(
            self.needs_painting(id),
            "paint called on a layer that does not need painting"
        );
        let node = self.node(id);
        match &node.kind {
            LayerKind::Container => self.paint_children(id, ctx),
            LayerKind::Transform(transform) => {
                let target = ctx.active_view;
                let canvas = ctx.canvas();
                canvas.save();
                canvas.transform(*transform);
                self.paint_children(id, ctx);
                ctx.canvas_for(target).restore();
            }
            LayerKind::ClipRect { rect, behavior } => {
                self.paint_clip(id, ctx, *behavior, *rect, |canvas, aa| {
                    canvas.clip_rect(*rect, aa);
                });
            }
            LayerKind::ClipRRect { rrect, behavior } => {
                self.paint_clip(id, ctx, *behavior, rrect.rect(), |canvas, aa| {
                    canvas.clip_rrect(*rrect, aa);
                });
            }
            LayerKind::ClipPath { path, behavior } => {
                use peniko::kurbo::Shape;
                self.paint_clip(id, ctx, *behavior, path.bounding_box(), |canvas, aa| {
                    canvas.clip_path(path, aa);
                });
            }
            LayerKind::Opacity { alpha, offset } => {
                self.paint_opacity(id, ctx, *alpha, *offset);
            }
            LayerKind::Picture {
                picture, offset, ..
            } => {
                let cached = ctx.raster_cache.and_then(|cache| {
                    let transform = ctx.canvas().current_transform() * Affine::translate(*offset);
                    cache.get(ContentId::Picture(picture.id()), transform)
                });
                let canvas = ctx.canvas();
                canvas.save();
                canvas.translate(*offset);
                match cached {
                    Some(result) => result.draw(canvas, None),
                    None => canvas.draw_picture(picture),
                }
                canvas.restore();
            }
            LayerKind::Texture { id, rect, freeze } => {
                let texture = ctx.texture_registry.and_then(|r| r.get(*id));
                // An unregistered texture id paints nothing; the platform
                // may have torn the texture down mid-frame.
                if let Some(texture) = texture {
                    texture.paint(ctx.canvas(), *rect, *freeze);
                }
            }
            LayerKind::PlatformView { id, .. } => {
                if ctx.view_embedder.is_some() {
                    ctx.active_view = Some(*id);
                    // Touch the overlay so the embedder records this view's
                    // position in the composition order even if no overlay
                    // content follows.
                    let _ = ctx.canvas();
                }
            }
        }
    }

    fn paint_children(&self, id: LayerId, ctx: &mut PaintContext<'_, '_>) {
        for &child in &self.node(id).children {
            if self.needs_painting(child) {
                self.paint_node(child, ctx);
            }
        }
    }

    fn paint_clip(
        &self,
        id: LayerId,
        ctx: &mut PaintContext<'_, '_>,
        behavior: ClipBehavior,
        clip_bounds: Rect,
        apply_clip: impl Fn(&mut dyn Canvas, bool),
    ) {
        let target = ctx.active_view;
        let canvas = ctx.canvas();
        canvas.save();
        apply_clip(canvas, behavior.anti_alias());
        if behavior.uses_save_layer() {
            canvas.save_layer(Some(clip_bounds), &Paint::default());
        }
        self.paint_children(id, ctx);
        let canvas = ctx.canvas_for(target);
        if behavior.uses_save_layer() {
            canvas.restore();
        }
        canvas.restore();
    }

    fn paint_opacity(&self, id: LayerId, ctx: &mut PaintContext<'_, '_>, alpha: u8, offset: Vec2) {
        let cached = self.opacity_cache_candidate(id).copied().and_then(|child| {
            let cache = ctx.raster_cache?;
            let child_node = self.node(child);
            let transform = ctx.canvas().current_transform() * Affine::translate(offset);
            match &child_node.kind {
                LayerKind::Picture {
                    picture,
                    offset: picture_offset,
                    ..
                } => cache
                    .get(
                        ContentId::Picture(picture.id()),
                        transform * Affine::translate(*picture_offset),
                    )
                    .map(|result| (result, *picture_offset)),
                _ => cache
                    .get(ContentId::Layer(child_node.unique_id), transform)
                    .map(|result| (result, Vec2::ZERO)),
            }
        });
        let target = ctx.active_view;
        let node = self.node(id);
        let canvas = ctx.canvas();
        canvas.save();
        canvas.translate(offset);
        match cached {
            Some((result, content_offset)) => {
                // Fast path: the child subtree is already rasterized; apply
                // the alpha while blitting instead of re-recording. The
                // canvas must match the transform the entry was keyed under,
                // which includes a cached picture's own offset.
                canvas.translate(content_offset);
                result.draw(canvas, Some(&Paint::from_alpha(alpha)));
                canvas.restore();
            }
            None => {
                let child_bounds = node
                    .children
                    .iter()
                    .fold(Rect::ZERO, |acc, &c| {
                        geometry::union_paint_bounds(acc, self.node(c).paint_bounds)
                    });
                canvas.save_layer(Some(child_bounds), &Paint::from_alpha(alpha));
                self.paint_children(id, ctx);
                let canvas = ctx.canvas_for(target);
                canvas.restore();
                canvas.restore();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Paint;
    use crate::picture::PictureRecorder;
    use peniko::Color;

    fn picture(bounds: Rect, ops: usize) -> Picture {
        let mut rec = PictureRecorder::new(bounds);
        for _ in 0..ops {
            rec.draw_rect(
                bounds,
                &Paint {
                    color: Color::rgba8(200, 40, 40, 255),
                    ..Paint::default()
                },
            );
        }
        rec.finish()
    }

    fn preroll(tree: &mut LayerTree) {
        let mut ctx = PrerollContext::new(None, None, None);
        tree.preroll(&mut ctx, Affine::IDENTITY);
    }

    #[test]
    fn clip_rect_bounds_are_the_intersection() {
        let mut builder = LayerTreeBuilder::new();
        let clip = builder.push_clip_rect(Rect::new(0.0, 0.0, 100.0, 100.0), ClipBehavior::HardEdge);
        builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(10.0, 10.0, 50.0, 50.0), 1),
            false,
            false,
        );
        builder.pop();
        let mut tree = builder.build(Size::new(1000.0, 1000.0), 1.0);
        preroll(&mut tree);
        assert_eq!(tree.paint_bounds(clip), Rect::new(10.0, 10.0, 50.0, 50.0));
    }

    #[test]
    fn clip_culls_disjoint_children() {
        let mut builder = LayerTreeBuilder::new();
        let clip = builder.push_clip_rect(Rect::new(0.0, 0.0, 20.0, 20.0), ClipBehavior::HardEdge);
        let child = builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(100.0, 100.0, 150.0, 150.0), 1),
            false,
            false,
        );
        builder.pop();
        let mut tree = builder.build(Size::new(1000.0, 1000.0), 1.0);
        preroll(&mut tree);
        assert_eq!(tree.paint_bounds(clip), Rect::ZERO);
        assert!(!tree.needs_painting(child));
        assert!(!tree.needs_painting(clip));
    }

    #[test]
    fn transform_maps_child_bounds_into_parent_space() {
        let mut builder = LayerTreeBuilder::new();
        let xform = builder.push_transform(Affine::translate(Vec2::new(5.0, 5.0)));
        builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(0.0, 0.0, 10.0, 10.0), 1),
            false,
            false,
        );
        builder.pop();
        let mut tree = builder.build(Size::new(100.0, 100.0), 1.0);
        preroll(&mut tree);
        assert_eq!(tree.paint_bounds(xform), Rect::new(5.0, 5.0, 15.0, 15.0));
    }

    #[test]
    fn degenerate_transform_culls_subtree() {
        let mut builder = LayerTreeBuilder::new();
        let xform =
            builder.push_transform(Affine::new([f64::NAN, 0.0, 0.0, 1.0, 0.0, 0.0]));
        builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(0.0, 0.0, 10.0, 10.0), 1),
            false,
            false,
        );
        builder.pop();
        let mut tree = builder.build(Size::new(100.0, 100.0), 1.0);
        preroll(&mut tree);
        assert_eq!(tree.paint_bounds(xform), Rect::ZERO);
        assert!(!tree.needs_painting(xform));
    }

    #[test]
    fn preroll_visits_children_in_insertion_order() {
        let mut builder = LayerTreeBuilder::new();
        let a = builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(0.0, 0.0, 1.0, 1.0), 1),
            false,
            false,
        );
        let b = builder.add_picture(
            Vec2::ZERO,
            picture(Rect::new(1.0, 0.0, 2.0, 1.0), 1),
            false,
            false,
        );
        let tree = builder.build(Size::new(10.0, 10.0), 1.0);
        assert_eq!(tree.children(tree.root()), &[a, b]);
    }

    #[test]
    fn paint_order_is_insertion_order() {
        let first = picture(Rect::new(0.0, 0.0, 4.0, 4.0), 1);
        let second = picture(Rect::new(0.0, 0.0, 4.0, 4.0), 1);
        let (first_id, second_id) = (first.id(), second.id());

        let mut builder = LayerTreeBuilder::new();
        builder.add_picture(Vec2::ZERO, first, false, false);
        builder.add_picture(Vec2::ZERO, second, false, false);
        let mut tree = builder.build(Size::new(10.0, 10.0), 1.0);
        preroll(&mut tree);

        let mut recorder = PictureRecorder::new(Rect::new(0.0, 0.0, 10.0, 10.0));
        let mut ctx = PaintContext::new(&mut recorder, None, None, None);
        tree.paint(&mut ctx);
        let painted = recorder.finish();
        // Expect the two pictures in order within the recorded stream.
        let mut seen = Vec::new();
        collect_picture_ids(&painted, &mut seen);
        assert_eq!(seen, vec![first_id, second_id]);
    }

    fn collect_picture_ids(picture: &Picture, out: &mut Vec<crate::picture::PictureId>) {
        let mut probe = ProbeCanvas { out };
        picture.replay(&mut probe);

        struct ProbeCanvas<'a> {
            out: &'a mut Vec<crate::picture::PictureId>,
        }
        impl Canvas for ProbeCanvas<'_> {
            fn save(&mut self) {}
            fn save_layer(&mut self, _: Option<Rect>, _: &Paint) {}
            fn restore(&mut self) {}
            fn translate(&mut self, _: Vec2) {}
            fn transform(&mut self, _: Affine) {}
            fn set_transform(&mut self, _: Affine) {}
            fn current_transform(&self) -> Affine {
                Affine::IDENTITY
            }
            fn clip_rect(&mut self, _: Rect, _: bool) {}
            fn clip_rrect(&mut self, _: RoundedRect, _: bool) {}
            fn clip_path(&mut self, _: &BezPath, _: bool) {}
            fn device_clip_bounds(&self) -> Rect {
                Rect::new(0.0, 0.0, 1e6, 1e6)
            }
            fn draw_rect(&mut self, _: Rect, _: &Paint) {}
            fn draw_picture(&mut self, picture: &Picture) {
                self.out.push(picture.id());
            }
            fn draw_image(&mut self, _: &crate::canvas::DeviceImage, _: Rect, _: &Paint) {}
            fn draw_text_blob(
                &mut self,
                _: &crate::canvas::TextBlob,
                _: peniko::kurbo::Point,
                _: &Paint,
            ) {
            }
        }
    }

    #[test]
    fn multi_child_opacity_has_no_cache_candidate() {
        let mut builder = LayerTreeBuilder::new();
        let opacity = builder.push_opacity(128, Vec2::ZERO);
        builder.add_picture(Vec2::ZERO, picture(Rect::new(0.0, 0.0, 4.0, 4.0), 1), false, false);
        builder.add_picture(Vec2::ZERO, picture(Rect::new(4.0, 0.0, 8.0, 4.0), 1), false, false);
        builder.pop();
        let mut tree = builder.build(Size::new(10.0, 10.0), 1.0);
        preroll(&mut tree);
        assert!(tree.opacity_cache_candidate(opacity).is_none());
    }

    #[test]
    fn platform_view_subtree_is_uncacheable() {
        let mut builder = LayerTreeBuilder::new();
        let opacity = builder.push_opacity(128, Vec2::ZERO);
        builder.push_container();
        builder.add_platform_view(ViewId(1), Rect::new(0.0, 0.0, 4.0, 4.0));
        builder.pop();
        builder.pop();
        let mut tree = builder.build(Size::new(10.0, 10.0), 1.0);
        preroll(&mut tree);
        assert!(tree.opacity_cache_candidate(opacity).is_none());
    }

    #[test]
    fn builder_pop_past_root_is_a_noop_in_release() {
        if cfg!(not(debug_assertions)) {
            let mut builder = LayerTreeBuilder::new();
            builder.pop();
            let tree = builder.build(Size::new(1.0, 1.0), 1.0);
            assert_eq!(tree.children(tree.root()), &[] as &[LayerId]);
        }
    }
}
