use ndarray::{s, Array2, Array3};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::inference::InferenceService;
use crate::patch::{read_patch, Patch};
use crate::raster::{PixelWindow, RasterSource};

use super::plan::{plan_tiles, Tile};
use super::volume::ProbabilityVolume;
use super::TilingConfig;

/// Highest class count representable by the `u8` classification raster.
const MAX_CLASSES: usize = 256;

/// Tile bookkeeping for one plot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TilingStats {
    pub tiles_planned: usize,
    /// Tiles whose kept region lies entirely outside the plot.
    pub skipped_outside_plot: usize,
    /// Tiles that do not touch the raster.
    pub skipped_no_data: usize,
    pub tiles_inferred: usize,
    pub batches: usize,
}

#[derive(Debug, Clone)]
pub struct TilingOutcome {
    pub volume: ProbabilityVolume,
    pub stats: TilingStats,
}

/// Walk `window` tile by tile, infer in batches, and sum the kept regions of
/// the returned probability maps into one volume.
///
/// `mask` is the plot occupancy mask for `window` (`[height, width]`).
pub fn run_tiled_inference<R, S>(
    raster: &R,
    service: &mut S,
    window: &PixelWindow,
    mask: &Array2<bool>,
    config: &TilingConfig,
) -> Result<TilingOutcome>
where
    R: RasterSource + ?Sized,
    S: InferenceService + ?Sized,
{
    config.validate()?;
    config.preflight(window.width, window.height)?;
    if mask.dim() != (window.height, window.width) {
        return Err(Error::ShapeMismatch {
            expected: vec![window.height, window.width],
            actual: mask.shape().to_vec(),
        });
    }

    let tiles = plan_tiles(window.width, window.height, config)?;
    let mut stats = TilingStats { tiles_planned: tiles.len(), ..Default::default() };
    let mut batch = Batch::new(service, config, window.height, window.width);

    for tile in tiles {
        let inside = mask
            .slice(s![tile.kept_rows(), tile.kept_cols()])
            .iter()
            .any(|&v| v);
        if !inside {
            stats.skipped_outside_plot += 1;
            continue;
        }

        let patch = read_patch(
            raster,
            window.row_off + tile.row() as i64,
            window.col_off + tile.col() as i64,
            config.tile_size,
            config.tile_size,
        )?;
        let Some(patch) = patch else {
            stats.skipped_no_data += 1;
            continue;
        };

        batch.push(tile, patch);
        if batch.len() >= config.batch_size {
            batch.flush(&mut stats)?;
        }
    }
    batch.flush(&mut stats)?;

    debug!(
        planned = stats.tiles_planned,
        inferred = stats.tiles_inferred,
        outside = stats.skipped_outside_plot,
        no_data = stats.skipped_no_data,
        batches = stats.batches,
        "tiling finished"
    );
    Ok(TilingOutcome { volume: batch.volume, stats })
}

/// Tiles waiting for the next inference call plus the volume they feed.
struct Batch<'a, S: InferenceService + ?Sized> {
    service: &'a mut S,
    tile_size: usize,
    tiles: Vec<Tile>,
    patches: Vec<Patch>,
    volume: ProbabilityVolume,
}

impl<'a, S: InferenceService + ?Sized> Batch<'a, S> {
    fn new(service: &'a mut S, config: &TilingConfig, height: usize, width: usize) -> Self {
        Self {
            service,
            tile_size: config.tile_size,
            tiles: Vec::with_capacity(config.batch_size),
            patches: Vec::with_capacity(config.batch_size),
            volume: ProbabilityVolume::new(height, width),
        }
    }

    fn len(&self) -> usize {
        self.tiles.len()
    }

    fn push(&mut self, tile: Tile, patch: Patch) {
        self.tiles.push(tile);
        self.patches.push(patch);
    }

    fn flush(&mut self, stats: &mut TilingStats) -> Result<()> {
        if self.tiles.is_empty() {
            return Ok(());
        }
        let maps = self
            .service
            .infer(&self.patches)
            .map_err(|e| Error::InferenceFailure {
                message: format!("service call for {} tiles failed", self.patches.len()),
                source: Some(e),
            })?;
        if maps.len() != self.tiles.len() {
            return Err(Error::inference(format!(
                "service returned {} maps for {} tiles",
                maps.len(),
                self.tiles.len()
            )));
        }

        for (tile, map) in self.tiles.iter().zip(&maps) {
            self.check_map(map)?;
            self.volume.accumulate(tile, map.view())?;
        }
        stats.tiles_inferred += self.tiles.len();
        stats.batches += 1;
        debug!(tiles = self.tiles.len(), classes = ?self.volume.num_classes(), "batch accumulated");

        self.tiles.clear();
        self.patches.clear();
        Ok(())
    }

    fn check_map(&self, map: &Array3<f32>) -> Result<()> {
        let (classes, h, w) = map.dim();
        if classes == 0 || classes > MAX_CLASSES {
            return Err(Error::inference(format!("unsupported class count {classes}")));
        }
        if (h, w) != (self.tile_size, self.tile_size) {
            return Err(Error::inference(format!(
                "probability map is {h}x{w}, expected {0}x{0}",
                self.tile_size
            )));
        }
        if let Some(((k, r, c), v)) = map.indexed_iter().find(|(_, v)| !v.is_finite() || **v < 0.0) {
            return Err(Error::inference(format!(
                "probability map holds {v} at class {k}, row {r}, col {c}; scores must be finite and non-negative"
            )));
        }
        Ok(())
    }
}
