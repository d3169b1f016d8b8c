// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Numeric helpers for bounds accumulation and transform bookkeeping.
//!
//! All of the rect math here is defensive about non-finite input: a `NaN`
//! that sneaks into a paint-bounds union must collapse to an empty rect
//! instead of poisoning every ancestor's bounds.

use peniko::kurbo::{Affine, Rect, Vec2};

/// Returns true if `rect` has no area or contains non-finite coordinates.
///
/// This is the emptiness test used throughout preroll; a degenerate rect is
/// treated the same as an absent one.
pub fn rect_is_empty(rect: Rect) -> bool {
    !rect.is_finite() || rect.x1 <= rect.x0 || rect.y1 <= rect.y0
}

/// Union of two paint-bounds rects where either side may be empty.
///
/// A plain [`Rect::union`] with a zero rect would grow the result towards
/// the origin; empty operands are ignored instead.
pub fn union_paint_bounds(a: Rect, b: Rect) -> Rect {
    match (rect_is_empty(a), rect_is_empty(b)) {
        (true, true) => Rect::ZERO,
        (true, false) => b,
        (false, true) => a,
        (false, false) => a.union(b),
    }
}

/// Intersection that maps disjoint or non-finite input to [`Rect::ZERO`].
pub fn intersect_paint_bounds(a: Rect, b: Rect) -> Rect {
    if rect_is_empty(a) || rect_is_empty(b) {
        return Rect::ZERO;
    }
    let isect = a.intersect(b);
    if rect_is_empty(isect) {
        Rect::ZERO
    } else {
        isect
    }
}

/// Axis-aligned bounding box of `rect` under `transform`.
///
/// Degenerate transforms (or rects) yield [`Rect::ZERO`] rather than
/// propagating `NaN` into the caller's unions.
pub fn transformed_bounds(transform: Affine, rect: Rect) -> Rect {
    if !transform.is_finite() || rect_is_empty(rect) {
        return Rect::ZERO;
    }
    let bounds = transform.transform_rect_bbox(rect);
    if rect_is_empty(bounds) {
        Rect::ZERO
    } else {
        bounds
    }
}

/// Snaps the translation components of `transform` to whole device pixels.
///
/// Used when fractional-translation support is off, so that a cached image
/// rasterized under one transform can be reused after an integer-pixel pan.
pub fn integral_transform(transform: Affine) -> Affine {
    let [a, b, c, d, e, f] = transform.as_coeffs();
    Affine::new([a, b, c, d, e.round(), f.round()])
}

/// The sub-pixel (0..1 per axis) part of the translation of `transform`.
pub fn fractional_translation(transform: Affine) -> Vec2 {
    let t = transform.translation();
    Vec2::new(t.x - t.x.floor(), t.y - t.y.floor())
}

/// A 2D affine transform split into its geometric parts.
///
/// The decomposition follows the usual QR-style convention: the transform is
/// `translate * rotate * skew * scale`, applied right to left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineDecomposition {
    pub translation: Vec2,
    /// Rotation angle in radians.
    pub rotation: f64,
    pub scale: Vec2,
    /// Horizontal shear factor.
    pub skew: f64,
}

/// Decomposes `transform`, returning `None` for singular or non-finite
/// matrices.
pub fn decompose(transform: Affine) -> Option<AffineDecomposition> {
    if !transform.is_finite() || transform.determinant() == 0.0 {
        return None;
    }
    let [a, b, c, d, e, f] = transform.as_coeffs();
    // Gram-Schmidt on the two basis columns.
    let scale_x = (a * a + b * b).sqrt();
    let rotation = b.atan2(a);
    let shear = (a * c + b * d) / (scale_x * scale_x);
    let sheared_c = c - a * shear;
    let sheared_d = d - b * shear;
    let mut scale_y = (sheared_c * sheared_c + sheared_d * sheared_d).sqrt();
    if transform.determinant() < 0.0 {
        scale_y = -scale_y;
    }
    Some(AffineDecomposition {
        translation: Vec2::new(e, f),
        rotation,
        scale: Vec2::new(scale_x, scale_y),
        skew: shear,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn union_ignores_empty_operands() {
        let r = Rect::new(10.0, 10.0, 50.0, 50.0);
        assert_eq!(union_paint_bounds(Rect::ZERO, r), r);
        assert_eq!(union_paint_bounds(r, Rect::ZERO), r);
        assert_eq!(union_paint_bounds(Rect::ZERO, Rect::ZERO), Rect::ZERO);
    }

    #[test]
    fn union_degrades_nan_to_empty() {
        let r = Rect::new(10.0, 10.0, 50.0, 50.0);
        let bad = Rect::new(f64::NAN, 0.0, 20.0, 20.0);
        assert_eq!(union_paint_bounds(bad, r), r);
        assert!(rect_is_empty(union_paint_bounds(bad, bad)));
    }

    #[test]
    fn intersect_disjoint_is_zero() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(intersect_paint_bounds(a, b), Rect::ZERO);
    }

    #[test]
    fn transformed_bounds_of_degenerate_matrix_is_empty() {
        let collapse = Affine::new([0.0, 0.0, 0.0, 0.0, 5.0, 5.0]);
        let r = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(rect_is_empty(transformed_bounds(collapse, r)));
        let nan = Affine::new([f64::NAN, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(rect_is_empty(transformed_bounds(nan, r)));
    }

    #[test]
    fn integral_transform_drops_subpixel_pan() {
        let m = Affine::translate(Vec2::new(10.25, -3.75));
        let snapped = integral_transform(m);
        assert_eq!(snapped.translation(), Vec2::new(10.0, -4.0));
        let frac = fractional_translation(m);
        assert!((frac.x - 0.25).abs() < 1e-12);
        assert!((frac.y - 0.25).abs() < 1e-12);
    }

    #[test]
    fn decompose_recovers_rotation_and_scale() {
        let m = Affine::translate(Vec2::new(3.0, 4.0))
            * Affine::rotate(FRAC_PI_4)
            * Affine::scale_non_uniform(2.0, 3.0);
        let d = decompose(m).unwrap();
        assert!((d.rotation - FRAC_PI_4).abs() < 1e-9);
        assert!((d.scale.x - 2.0).abs() < 1e-9);
        assert!((d.scale.y - 3.0).abs() < 1e-9);
        assert!((d.translation.x - 3.0).abs() < 1e-9);
        assert!((d.translation.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn decompose_rejects_singular() {
        assert!(decompose(Affine::new([0.0, 0.0, 0.0, 0.0, 0.0, 0.0])).is_none());
    }
}
