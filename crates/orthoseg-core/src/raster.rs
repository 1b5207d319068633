//! Raster dataset access: the [`RasterSource`] seam, pixel windows, and an
//! in-memory band-sequential raster.
use ndarray::{s, Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::coords::Affine;
use crate::error::{Error, Result};

/// Integer pixel rectangle in raster grid coordinates. May extend past the
/// raster bounds (negative offsets included).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn new(col_off: i64, row_off: i64, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    /// Window spanning `[min_col, max_col) × [min_row, max_row)`.
    /// Returns `None` when either extent is not positive.
    pub fn from_bounds(min_col: i64, min_row: i64, max_col: i64, max_row: i64) -> Option<Self> {
        if max_col <= min_col || max_row <= min_row {
            return None;
        }
        Some(Self::new(
            min_col,
            min_row,
            (max_col - min_col) as usize,
            (max_row - min_row) as usize,
        ))
    }

    pub fn max_col(&self) -> i64 {
        self.col_off + self.width as i64
    }

    pub fn max_row(&self) -> i64 {
        self.row_off + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Grow the far edges so both extents are at least `min_size`.
    pub fn enlarged_to(&self, min_size: usize) -> Self {
        Self {
            width: self.width.max(min_size),
            height: self.height.max(min_size),
            ..*self
        }
    }

    /// Overlap with a `width × height` raster anchored at the origin.
    pub fn intersect_raster(&self, width: usize, height: usize) -> Option<Self> {
        let min_col = self.col_off.max(0);
        let min_row = self.row_off.max(0);
        let max_col = self.max_col().min(width as i64);
        let max_row = self.max_row().min(height as i64);
        Self::from_bounds(min_col, min_row, max_col, max_row)
    }
}

/// A georeferenced, window-readable multi-band raster.
///
/// `read_window` is only ever called with windows fully inside the raster;
/// callers clip first.
pub trait RasterSource {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn band_count(&self) -> usize;
    fn transform(&self) -> Affine;
    fn crs(&self) -> &str;

    /// Read `window` of the zero-based `band` as a `[height, width]` array.
    fn read_window(&self, band: usize, window: &PixelWindow) -> Result<Array2<u8>>;
}

/// Whole raster held in memory as `[band, row, col]`.
#[derive(Debug, Clone)]
pub struct InMemoryRaster {
    data: Array3<u8>,
    transform: Affine,
    crs: String,
}

impl InMemoryRaster {
    pub fn new(data: Array3<u8>, transform: Affine, crs: impl Into<String>) -> Self {
        Self { data, transform, crs: crs.into() }
    }

    /// Uniform raster, handy for synthetic scenes.
    pub fn filled(width: usize, height: usize, bands: usize, value: u8, transform: Affine, crs: &str) -> Self {
        Self::new(Array3::from_elem((bands, height, width), value), transform, crs)
    }

    #[inline]
    pub fn get(&self, band: usize, row: usize, col: usize) -> u8 {
        self.data[[band, row, col]]
    }

    #[inline]
    pub fn set(&mut self, band: usize, row: usize, col: usize, val: u8) {
        self.data[[band, row, col]] = val;
    }
}

impl RasterSource for InMemoryRaster {
    fn width(&self) -> usize {
        self.data.dim().2
    }

    fn height(&self) -> usize {
        self.data.dim().1
    }

    fn band_count(&self) -> usize {
        self.data.dim().0
    }

    fn transform(&self) -> Affine {
        self.transform
    }

    fn crs(&self) -> &str {
        &self.crs
    }

    fn read_window(&self, band: usize, window: &PixelWindow) -> Result<Array2<u8>> {
        let inside = window.intersect_raster(self.width(), self.height());
        if band >= self.band_count() || inside != Some(*window) {
            return Err(Error::RasterRead(
                format!("band {band} window {window:?} outside {}x{} raster", self.width(), self.height()).into(),
            ));
        }
        let (r0, c0) = (window.row_off as usize, window.col_off as usize);
        Ok(self
            .data
            .slice(s![band, r0..r0 + window.height, c0..c0 + window.width])
            .to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_clip_and_enlarge() {
        let w = PixelWindow::new(-3, 5, 10, 10);
        assert_eq!(w.intersect_raster(6, 8), Some(PixelWindow::new(0, 5, 6, 3)));
        assert_eq!(PixelWindow::new(20, 0, 4, 4).intersect_raster(6, 8), None);
        let big = PixelWindow::new(1, 2, 100, 300).enlarged_to(256);
        assert_eq!((big.width, big.height), (256, 300));
        assert!(PixelWindow::from_bounds(3, 3, 3, 9).is_none());
    }

    #[test]
    fn read_window_rejects_out_of_bounds() {
        let ras = InMemoryRaster::filled(4, 4, 1, 7, Affine::identity(), "");
        let ok = ras.read_window(0, &PixelWindow::new(1, 1, 2, 3)).unwrap();
        assert_eq!(ok.dim(), (3, 2));
        assert!(ok.iter().all(|&v| v == 7));
        assert!(ras.read_window(0, &PixelWindow::new(3, 0, 2, 2)).is_err());
        assert!(ras.read_window(1, &PixelWindow::new(0, 0, 2, 2)).is_err());
    }
}
