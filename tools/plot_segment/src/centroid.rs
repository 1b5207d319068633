//! Nearest-centroid colour classifier behind the `InferenceService` seam.
//!
//! Scores every pixel by its squared RGB distance to one centroid per class
//! and turns the scores into probabilities with a temperature softmax. It
//! needs no model runtime, which makes whole runs reproducible.
use std::fs;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use ndarray::Array3;
use orthoseg_core::{BoxError, InferenceService, Patch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidModel {
    /// RGB centroid per class; index = class id.
    pub centroids: Vec<[f32; 3]>,
    /// Softmax temperature in squared-distance units.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    400.0
}

impl CentroidModel {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let model: CentroidModel =
            serde_json::from_str(&text).with_context(|| format!("Invalid centroid model {}", path.display()))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.centroids.is_empty(), "centroid model has no classes");
        ensure!(self.centroids.len() <= 256, "at most 256 classes fit a u8 class raster");
        ensure!(self.temperature > 0.0, "temperature must be positive");
        Ok(())
    }
}

pub struct NearestCentroid {
    model: CentroidModel,
    scores: Vec<f32>,
}

impl NearestCentroid {
    pub fn new(model: CentroidModel) -> Self {
        let k = model.centroids.len();
        Self { model, scores: vec![0.0; k] }
    }

    fn classify(&mut self, patch: &Patch) -> Array3<f32> {
        let (h, w, bands) = (patch.height(), patch.width(), patch.bands());
        let k = self.model.centroids.len();
        let mut out = Array3::<f32>::zeros((k, h, w));

        for r in 0..h {
            for c in 0..w {
                let rgb = [0, 1, 2].map(|b| patch.pixels[[r, c, b.min(bands - 1)]] as f32);
                for (score, centroid) in self.scores.iter_mut().zip(&self.model.centroids) {
                    let d2: f32 = rgb.iter().zip(centroid).map(|(p, q)| (p - q) * (p - q)).sum();
                    *score = -d2 / self.model.temperature;
                }
                // Stable softmax.
                let max = self.scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut total = 0.0;
                for s in self.scores.iter_mut() {
                    *s = (*s - max).exp();
                    total += *s;
                }
                for (class, s) in self.scores.iter().enumerate() {
                    out[[class, r, c]] = s / total;
                }
            }
        }
        out
    }
}

impl InferenceService for NearestCentroid {
    fn infer(&mut self, batch: &[Patch]) -> std::result::Result<Vec<Array3<f32>>, BoxError> {
        if let Some(p) = batch.iter().find(|p| p.bands() == 0) {
            return Err(format!("patch of {}x{} has no bands", p.height(), p.width()).into());
        }
        Ok(batch.iter().map(|p| self.classify(p)).collect())
    }
}
