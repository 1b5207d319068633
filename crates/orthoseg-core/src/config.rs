use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tiling::TilingConfig;
use crate::vectorize::VectorizeOptions;

/// Every knob of one pipeline run.
///
/// Deserializes from partial JSON; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tiling: TilingConfig,
    /// Plot windows are grown to at least this many pixels per side (and
    /// never below the tile size).
    pub min_tile_size: usize,
    pub vectorize: VectorizeOptions,
    /// Optional human-readable label per class id, copied onto result
    /// polygons as `class_name`.
    pub class_names: Option<BTreeMap<u8, String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiling: TilingConfig::default(),
            min_tile_size: 256,
            vectorize: VectorizeOptions::default(),
            class_names: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.tiling.validate()?;
        if self.min_tile_size == 0 {
            return Err(Error::InvalidTilingConfig("min_tile_size must be positive".into()));
        }
        if !self.vectorize.min_area.is_finite() || self.vectorize.min_area < 0.0 {
            return Err(Error::InvalidTilingConfig(format!(
                "min_area must be a non-negative number, got {}",
                self.vectorize.min_area
            )));
        }
        Ok(())
    }

    /// Smallest side a plot window may have.
    pub fn min_window(&self) -> usize {
        self.min_tile_size.max(self.tiling.tile_size)
    }

    pub fn class_name(&self, class: u8) -> Option<&str> {
        self.class_names.as_ref()?.get(&class).map(String::as_str)
    }
}
