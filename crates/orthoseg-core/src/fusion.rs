//! Probability volume → per-pixel class labels.
use ndarray::{Array2, Array3, Zip};

use crate::error::{Error, Result};
use crate::tiling::ProbabilityVolume;

/// Label written outside the plot.
pub const BACKGROUND: u8 = 0;

/// Arg-max over the class axis, masked to the plot.
///
/// Ties go to the lowest class index. Pixels where `mask` is false get
/// [`BACKGROUND`]. Fails with [`Error::EmptyVolume`] when no tile ever
/// contributed to the volume.
pub fn fuse(volume: &ProbabilityVolume, mask: &Array2<bool>) -> Result<Array2<u8>> {
    let probs = volume.as_array().ok_or(Error::EmptyVolume)?;
    fuse_array(probs, mask)
}

/// [`fuse`] over a raw `[classes, height, width]` array.
pub fn fuse_array(probs: &Array3<f32>, mask: &Array2<bool>) -> Result<Array2<u8>> {
    let (classes, height, width) = probs.dim();
    if mask.dim() != (height, width) {
        return Err(Error::ShapeMismatch {
            expected: vec![height, width],
            actual: mask.shape().to_vec(),
        });
    }

    let mut labels = Array2::<u8>::zeros((height, width));
    let pick = |(r, c): (usize, usize), out: &mut u8, &inside: &bool| {
        if !inside {
            *out = BACKGROUND;
            return;
        }
        let mut best = 0usize;
        let mut best_p = f32::NEG_INFINITY;
        for k in 0..classes {
            let p = probs[[k, r, c]];
            if p > best_p {
                best = k;
                best_p = p;
            }
        }
        *out = best as u8;
    };

    let zip = Zip::indexed(&mut labels).and(mask);
    #[cfg(feature = "threading")]
    zip.par_for_each(pick);
    #[cfg(not(feature = "threading"))]
    zip.for_each(pick);

    Ok(labels)
}
