// Copyright 2026 the Strato Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A simple pixmap type backing the software canvas.

use bytemuck::{Pod, Zeroable};
use peniko::Color;

/// A premultiplied RGBA8 pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct PremulRgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl PremulRgba8 {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };

    /// Premultiplies a straight-alpha color.
    pub fn from_color(color: Color) -> Self {
        let a = color.a as u16;
        let premul = |c: u8| ((c as u16 * a + 127) / 255) as u8;
        Self {
            r: premul(color.r),
            g: premul(color.g),
            b: premul(color.b),
            a: color.a,
        }
    }

    /// Source-over blend of `src` onto `self`, both premultiplied.
    pub fn over(self, src: Self) -> Self {
        let inv = 255 - src.a as u16;
        let blend = |d: u8, s: u8| (s as u16 + (d as u16 * inv + 127) / 255) as u8;
        Self {
            r: blend(self.r, src.r),
            g: blend(self.g, src.g),
            b: blend(self.b, src.b),
            a: blend(self.a, src.a),
        }
    }

    /// Scales all components by `alpha / 255`.
    pub fn modulate(self, alpha: u8) -> Self {
        let a = alpha as u16;
        let scale = |c: u8| ((c as u16 * a + 127) / 255) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
            a: scale(self.a),
        }
    }
}

/// A pixmap of premultiplied RGBA8 values.
///
/// All pixels are initialized to transparent black.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixmap {
    width: u32,
    height: u32,
    buf: Vec<PremulRgba8>,
}

impl Pixmap {
    pub fn new(width: u32, height: u32) -> Self {
        let buf = vec![PremulRgba8::TRANSPARENT; width as usize * height as usize];
        Self { width, height, buf }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[PremulRgba8] {
        &self.buf
    }

    /// The pixel data as raw RGBA bytes in row-major order.
    pub fn data_as_u8_slice(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buf)
    }

    /// Returns the pixel at `(x, y)`, or transparent black out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> PremulRgba8 {
        if x >= self.width || y >= self.height {
            return PremulRgba8::TRANSPARENT;
        }
        self.buf[(y * self.width + x) as usize]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: PremulRgba8) {
        if x < self.width && y < self.height {
            self.buf[(y * self.width + x) as usize] = pixel;
        }
    }

    /// Source-over blends `src` onto the pixel at `(x, y)`.
    pub fn blend_pixel(&mut self, x: u32, y: u32, src: PremulRgba8) {
        if x < self.width && y < self.height {
            let idx = (y * self.width + x) as usize;
            self.buf[idx] = self.buf[idx].over(src);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn premultiply_half_alpha() {
        let p = PremulRgba8::from_color(Color::rgba8(255, 0, 0, 128));
        assert_eq!(p.r, 128);
        assert_eq!(p.a, 128);
    }

    #[test]
    fn over_opaque_src_replaces() {
        let dst = PremulRgba8::from_color(Color::rgba8(0, 255, 0, 255));
        let src = PremulRgba8::from_color(Color::rgba8(255, 0, 0, 255));
        assert_eq!(dst.over(src), src);
    }

    #[test]
    fn out_of_bounds_reads_are_transparent() {
        let pm = Pixmap::new(2, 2);
        assert_eq!(pm.pixel(5, 5), PremulRgba8::TRANSPARENT);
    }
}
