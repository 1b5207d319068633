//! Windowed tile reads with zero padding outside the raster.
use ndarray::{s, Array3};

use crate::error::Result;
use crate::raster::{PixelWindow, RasterSource};

/// Bands read per tile. Orthophotos carry RGB (and sometimes alpha, ignored).
pub const PATCH_BANDS: usize = 3;

/// One tile image, `[height, width, bands]`, samples in raster band order.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub pixels: Array3<u8>,
}

impl Patch {
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn bands(&self) -> usize {
        self.pixels.dim().2
    }
}

/// Read a `width × height` patch whose top-left pixel is `(row, col)`.
///
/// Returns `Ok(None)` when the request does not touch the raster at all.
/// Otherwise the patch always has the requested size; the part that overlaps
/// the raster is copied at its true offset and the rest stays zero.
pub fn read_patch<R: RasterSource + ?Sized>(
    raster: &R,
    row: i64,
    col: i64,
    width: usize,
    height: usize,
) -> Result<Option<Patch>> {
    let request = PixelWindow::new(col, row, width, height);
    let Some(inside) = request.intersect_raster(raster.width(), raster.height()) else {
        return Ok(None);
    };

    let bands = raster.band_count().min(PATCH_BANDS);
    let mut pixels = Array3::<u8>::zeros((height, width, bands));

    let dr = (inside.row_off - row) as usize;
    let dc = (inside.col_off - col) as usize;
    for b in 0..bands {
        let band = raster.read_window(b, &inside)?;
        pixels
            .slice_mut(s![dr..dr + inside.height, dc..dc + inside.width, b])
            .assign(&band);
    }
    Ok(Some(Patch { pixels }))
}
