//! Sliding-window tile layout and discard margins.
//!
//! Per axis, origins are `0, step, 2·step, …` while the tile still ends short
//! of the far edge, then one last tile flush with the far edge. Each tile
//! keeps a sub-range of its pixels for accumulation:
//!
//!   near edge: 0 at the window boundary, ⌊0.1·tile⌋ at an interior seam
//!   far edge:  tile at the window boundary, ⌊0.9·tile⌋ at an interior seam
//!
//! A seam only discards when the two tiles overlap enough that the
//! neighbour keeps the discarded strip; tiles that merely abut keep
//! everything. Every pixel of the window is therefore kept by at least one
//! tile.
use std::ops::Range;

use crate::error::Result;

use super::TilingConfig;

/// Fraction of the tile edge discarded at interior seams.
pub const DISCARD_FRACTION: f64 = 0.1;

/// One tile position along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisSpan {
    /// Window-relative tile origin.
    pub origin: usize,
    /// Tile-local kept range start.
    pub keep_start: usize,
    /// Tile-local kept range end (exclusive), clipped to the window.
    pub keep_end: usize,
}

impl AxisSpan {
    /// Window-relative kept range.
    pub fn kept(&self) -> Range<usize> {
        self.origin + self.keep_start..self.origin + self.keep_end
    }

    pub fn discards(&self, tile: usize) -> bool {
        self.keep_start > 0 || self.keep_end < tile
    }
}

/// A tile in window coordinates plus the region it contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub rows: AxisSpan,
    pub cols: AxisSpan,
}

impl Tile {
    pub fn row(&self) -> usize {
        self.rows.origin
    }

    pub fn col(&self) -> usize {
        self.cols.origin
    }

    pub fn kept_rows(&self) -> Range<usize> {
        self.rows.kept()
    }

    pub fn kept_cols(&self) -> Range<usize> {
        self.cols.kept()
    }
}

/// Tile origins along an axis of length `extent`.
pub fn axis_origins(extent: usize, tile: usize, step: usize) -> Vec<usize> {
    if extent <= tile {
        return vec![0];
    }
    let mut origins: Vec<usize> = (0..).map(|k| k * step).take_while(|&o| o + tile < extent).collect();
    let last = extent - tile;
    if origins.last() != Some(&last) {
        origins.push(last);
    }
    origins
}

/// Origins plus kept ranges along one axis.
pub fn plan_axis(extent: usize, tile: usize, step: usize) -> Vec<AxisSpan> {
    let origins = axis_origins(extent, tile, step);
    let near = (tile as f64 * DISCARD_FRACTION) as usize;
    let far = (tile as f64 * (1.0 - DISCARD_FRACTION)) as usize;

    // seam_discards[i]: the seam between tile i and tile i + 1 is trimmed.
    let seam_discards: Vec<bool> = origins
        .windows(2)
        .map(|pair| pair[1] + near <= pair[0] + far)
        .collect();

    origins
        .iter()
        .enumerate()
        .map(|(i, &origin)| {
            let keep_start = if i > 0 && seam_discards[i - 1] { near } else { 0 };
            let keep_end = if i + 1 < origins.len() && seam_discards[i] { far } else { tile };
            AxisSpan {
                origin,
                keep_start,
                keep_end: keep_end.min(extent - origin),
            }
        })
        .collect()
}

/// Full row-major tile layout for a `width × height` window.
pub fn plan_tiles(width: usize, height: usize, config: &TilingConfig) -> Result<Vec<Tile>> {
    config.validate()?;
    let rows = plan_axis(height, config.tile_size, config.step());
    let cols = plan_axis(width, config.tile_size, config.step());
    Ok(rows
        .iter()
        .flat_map(|&r| cols.iter().map(move |&c| Tile { rows: r, cols: c }))
        .collect())
}
