//! Polygon → occupancy mask over a pixel window.
//!
//! A pixel belongs to a ring when its centre lies inside it (even-odd rule,
//! half-open on the right/bottom edges so abutting polygons never share a
//! pixel). The exterior is filled `true`, then every hole is filled `false`.
use geo_types::{LineString, Polygon};
use ndarray::Array2;

use crate::raster::PixelWindow;

/// Rasterize `polygon` over `window`.
///
/// `to_pixel` maps a map coordinate `(x, y)` to fractional raster `(row, col)`,
/// usually `|x, y| coords::map_to_pixel(&inverse, x, y)`. The returned mask is
/// `[window.height, window.width]` regardless of ring orientation.
pub fn rasterize_region<F>(polygon: &Polygon<f64>, to_pixel: F, window: &PixelWindow) -> Array2<bool>
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let mut mask = Array2::from_elem((window.height, window.width), false);
    let ring_px = |ring: &LineString<f64>| -> Vec<(f64, f64)> {
        ring.coords()
            .map(|c| {
                let (row, col) = to_pixel(c.x, c.y);
                (row - window.row_off as f64, col - window.col_off as f64)
            })
            .collect()
    };

    fill_ring(&mut mask, &ring_px(polygon.exterior()), true);
    for hole in polygon.interiors() {
        fill_ring(&mut mask, &ring_px(hole), false);
    }
    mask
}

/// Scanline fill of one ring given as window-relative `(row, col)` vertices.
/// The ring may or may not repeat its first vertex.
pub(crate) fn fill_ring(mask: &mut Array2<bool>, ring: &[(f64, f64)], value: bool) {
    let (height, width) = mask.dim();
    if ring.len() < 3 || height == 0 || width == 0 {
        return;
    }

    let min_row = ring.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let max_row = ring.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    // Rows whose centre r + 0.5 falls in [min_row, max_row).
    let r_start = ((min_row - 0.5).ceil().max(0.0)) as usize;
    let r_end = ((max_row - 0.5).ceil().min(height as f64)).max(0.0) as usize;

    let mut xs: Vec<f64> = Vec::with_capacity(8);
    for r in r_start..r_end {
        let y = r as f64 + 0.5;
        xs.clear();
        for i in 0..ring.len() {
            let (y0, x0) = ring[i];
            let (y1, x1) = ring[(i + 1) % ring.len()];
            if (y0 <= y && y < y1) || (y1 <= y && y < y0) {
                xs.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
            }
        }
        xs.sort_by(f64::total_cmp);

        for span in xs.chunks_exact(2) {
            // Columns whose centre c + 0.5 falls in [span[0], span[1]).
            let c0 = (span[0] - 0.5).ceil().max(0.0);
            let c1 = (span[1] - 0.5).ceil().min(width as f64);
            if c1 <= c0 {
                continue;
            }
            for c in c0 as usize..c1 as usize {
                mask[[r, c]] = value;
            }
        }
    }
}
