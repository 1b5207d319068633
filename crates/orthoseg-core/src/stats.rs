//! Per-class area summaries for one classified plot.
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fusion::BACKGROUND;

const M2_PER_HA: f64 = 10_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStats {
    pub class_id: u8,
    pub pixels: u64,
    pub area_m2: f64,
    pub area_ha: f64,
    /// Share of the plot's mask pixels, 0–100.
    pub percentage: f64,
}

/// Count non-background labels inside `mask` and convert to areas.
///
/// Classes absent from the plot are omitted; output is ordered by class id.
pub fn class_statistics(labels: &Array2<u8>, mask: &Array2<bool>, pixel_area_m2: f64) -> Result<Vec<ClassStats>> {
    if labels.dim() != mask.dim() {
        return Err(Error::ShapeMismatch {
            expected: labels.shape().to_vec(),
            actual: mask.shape().to_vec(),
        });
    }

    let mut counts = [0u64; 256];
    let mut plot_pixels = 0u64;
    Zip::from(labels).and(mask).for_each(|&label, &inside| {
        if inside {
            plot_pixels += 1;
            counts[label as usize] += 1;
        }
    });

    Ok(counts
        .iter()
        .enumerate()
        .filter(|&(class, &n)| n > 0 && class as u8 != BACKGROUND)
        .map(|(class, &n)| {
            let area_m2 = n as f64 * pixel_area_m2;
            ClassStats {
                class_id: class as u8,
                pixels: n,
                area_m2,
                area_ha: area_m2 / M2_PER_HA,
                percentage: 100.0 * n as f64 / plot_pixels as f64,
            }
        })
        .collect())
}
