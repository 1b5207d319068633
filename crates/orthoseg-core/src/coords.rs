//! Pixel grid ↔ map coordinate conversion.
//!
//! Axis convention used everywhere in this crate: arrays are indexed
//! `[row, col]`, `col` runs along the affine's first pixel axis and `row`
//! along its second:
//!
//!   x = a·col + b·row + c
//!   y = d·col + e·row + f
//!
//! All coordinate math uses f64.
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Six-coefficient pixel → map affine transform (GDAL/rasterio ordering).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// North-up transform with square-ish pixels: origin at the upper-left
    /// corner, `pixel_h` is usually negative.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_w: f64, pixel_h: f64) -> Self {
        Self::new(pixel_w, 0.0, origin_x, 0.0, pixel_h, origin_y)
    }

    /// Pure translation in pixel units (col offset, row offset).
    pub fn translation(col_off: f64, row_off: f64) -> Self {
        Self::new(1.0, 0.0, col_off, 0.0, 1.0, row_off)
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Affine) -> Affine {
        Affine {
            a: self.a * other.a + self.b * other.d,
            b: self.a * other.b + self.b * other.e,
            c: self.a * other.c + self.b * other.f + self.c,
            d: self.d * other.a + self.e * other.d,
            e: self.d * other.b + self.e * other.e,
            f: self.d * other.c + self.e * other.f + self.f,
        }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Area of one pixel in squared map units.
    pub fn pixel_area(&self) -> f64 {
        self.determinant().abs()
    }

    /// Map → pixel transform. `None` when the transform is degenerate.
    pub fn inverse(&self) -> Option<Affine> {
        let det = self.determinant();
        if det.abs() < f64::EPSILON * (self.a.abs() + self.e.abs()).max(1e-300) {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(Affine {
            a: ia,
            b: ib,
            c: -(ia * self.c + ib * self.f),
            d: id,
            e: ie,
            f: -(id * self.c + ie * self.f),
        })
    }

    /// Apply to `(col, row)`, returns `(x, y)`.
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Transform of a window whose top-left pixel is `(row_off, col_off)`.
    pub fn window_transform(&self, row_off: i64, col_off: i64) -> Affine {
        self.compose(&Affine::translation(col_off as f64, row_off as f64))
    }
}

/// Sub-pixel anchor used when turning a pixel index into a map coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PixelAnchor {
    #[default]
    Center,
    UpperLeft,
    UpperRight,
    LowerLeft,
    LowerRight,
}

impl PixelAnchor {
    /// `(col_off, row_off)` inside the pixel.
    pub fn offsets(self) -> (f64, f64) {
        match self {
            PixelAnchor::Center => (0.5, 0.5),
            PixelAnchor::UpperLeft => (0.0, 0.0),
            PixelAnchor::UpperRight => (1.0, 0.0),
            PixelAnchor::LowerLeft => (0.0, 1.0),
            PixelAnchor::LowerRight => (1.0, 1.0),
        }
    }
}

impl FromStr for PixelAnchor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "center" => Ok(PixelAnchor::Center),
            "ul" | "upper-left" => Ok(PixelAnchor::UpperLeft),
            "ur" | "upper-right" => Ok(PixelAnchor::UpperRight),
            "ll" | "lower-left" => Ok(PixelAnchor::LowerLeft),
            "lr" | "lower-right" => Ok(PixelAnchor::LowerRight),
            other => Err(Error::InvalidOffset(other.to_string())),
        }
    }
}

/// Map coordinate of pixel `(row, col)` at the given anchor.
pub fn pixel_to_map(t: &Affine, row: f64, col: f64, anchor: PixelAnchor) -> (f64, f64) {
    let (coff, roff) = anchor.offsets();
    t.compose(&Affine::translation(coff, roff)).apply(col, row)
}

/// Vectorised [`pixel_to_map`] over `(row, col)` pairs.
pub fn pixels_to_map(t: &Affine, pixels: &[(f64, f64)], anchor: PixelAnchor) -> Vec<(f64, f64)> {
    let (coff, roff) = anchor.offsets();
    let shifted = t.compose(&Affine::translation(coff, roff));
    pixels.iter().map(|&(row, col)| shifted.apply(col, row)).collect()
}

/// Fractional `(row, col)` of a map coordinate. `inverse` must come from
/// [`Affine::inverse`].
#[inline]
pub fn map_to_pixel(inverse: &Affine, x: f64, y: f64) -> (f64, f64) {
    let (col, row) = inverse.apply(x, y);
    (row, col)
}

/// Integer `(row, col)` of the pixel containing `(x, y)` (floored).
#[inline]
pub fn index(inverse: &Affine, x: f64, y: f64) -> (i64, i64) {
    let (row, col) = map_to_pixel(inverse, x, y);
    (row.floor() as i64, col.floor() as i64)
}
