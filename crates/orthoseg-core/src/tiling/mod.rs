//! Tiled inference: sliding-window planning → batched inference → additive
//! accumulation into a per-plot probability volume.
pub mod engine;
pub mod plan;
pub mod volume;

pub use engine::{run_tiled_inference, TilingOutcome, TilingStats};
pub use plan::{plan_axis, plan_tiles, AxisSpan, Tile, DISCARD_FRACTION};
pub use volume::ProbabilityVolume;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Bytes per probability sample assumed by the pre-flight estimate (f64
/// worst case, before the real class count and dtype are known).
pub const BYTES_PER_SAMPLE: u64 = 8;

pub const DEFAULT_MEMORY_BUDGET: u64 = 16 << 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    /// Edge length of the square tiles sent to the model, in pixels.
    pub tile_size: usize,
    /// Pixels shared by consecutive tiles. step = tile_size − overlap.
    pub overlap: usize,
    /// Tiles per inference call.
    pub batch_size: usize,
    /// Class count assumed by the memory pre-flight.
    pub class_upper_bound: usize,
    /// Ceiling for the estimated probability volume, in bytes.
    pub memory_budget_bytes: u64,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: 256,
            overlap: 128,
            batch_size: 32,
            class_upper_bound: 5,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET,
        }
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(Error::InvalidTilingConfig("tile_size must be positive".into()));
        }
        if self.overlap >= self.tile_size {
            return Err(Error::InvalidTilingConfig(format!(
                "overlap {} must be smaller than tile_size {} (step must be positive)",
                self.overlap, self.tile_size
            )));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidTilingConfig("batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn step(&self) -> usize {
        self.tile_size - self.overlap
    }

    /// Worst-case probability volume size for a `width × height` window.
    pub fn estimated_bytes(&self, width: usize, height: usize) -> u64 {
        (self.class_upper_bound as u64)
            .saturating_mul(width as u64)
            .saturating_mul(height as u64)
            .saturating_mul(BYTES_PER_SAMPLE)
    }

    /// Admission control: refuse windows whose worst-case volume would not
    /// fit the memory budget.
    pub fn preflight(&self, width: usize, height: usize) -> Result<()> {
        let required = self.estimated_bytes(width, height);
        if required > self.memory_budget_bytes {
            return Err(Error::MemoryBudgetExceeded { required, budget: self.memory_budget_bytes });
        }
        Ok(())
    }
}
