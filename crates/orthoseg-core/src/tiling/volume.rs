use ndarray::{s, Array3, ArrayView3};

use crate::error::{Error, Result};

use super::plan::Tile;

/// Summed class scores over one plot window, `[classes, height, width]`.
///
/// Storage is allocated on the first accumulated tile; its class count then
/// stays fixed for the plot.
#[derive(Debug, Clone)]
pub struct ProbabilityVolume {
    height: usize,
    width: usize,
    data: Option<Array3<f32>>,
}

impl ProbabilityVolume {
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width, data: None }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn num_classes(&self) -> Option<usize> {
        self.data.as_ref().map(|d| d.dim().0)
    }

    pub fn is_allocated(&self) -> bool {
        self.data.is_some()
    }

    pub fn as_array(&self) -> Option<&Array3<f32>> {
        self.data.as_ref()
    }

    pub fn into_array(self) -> Option<Array3<f32>> {
        self.data
    }

    /// Add `probs` (`[classes, tile_h, tile_w]`) cropped to the tile's kept
    /// region into the volume at the tile's offset.
    pub fn accumulate(&mut self, tile: &Tile, probs: ArrayView3<'_, f32>) -> Result<()> {
        let (classes, ph, pw) = probs.dim();
        if ph < tile.rows.keep_end || pw < tile.cols.keep_end {
            return Err(Error::inference(format!(
                "probability map {ph}x{pw} smaller than tile keep region {}x{}",
                tile.rows.keep_end, tile.cols.keep_end
            )));
        }

        let data = match self.data.take() {
            Some(d) => d,
            None => try_zeros(classes, self.height, self.width)?,
        };
        let data = self.data.insert(data);
        if data.dim().0 != classes {
            return Err(Error::inference(format!(
                "class count changed from {} to {classes} within one plot",
                data.dim().0
            )));
        }

        let (rows, cols) = (tile.kept_rows(), tile.kept_cols());
        let src = probs.slice(s![
            ..,
            tile.rows.keep_start..tile.rows.keep_end,
            tile.cols.keep_start..tile.cols.keep_end
        ]);
        let mut dst = data.slice_mut(s![.., rows, cols]);
        dst += &src;
        Ok(())
    }
}

/// Zeroed `[classes, height, width]` buffer, reporting allocation failure
/// instead of aborting.
fn try_zeros(classes: usize, height: usize, width: usize) -> Result<Array3<f32>> {
    let len = classes.saturating_mul(height).saturating_mul(width);
    let bytes = (len as u64).saturating_mul(std::mem::size_of::<f32>() as u64);
    let mut buf: Vec<f32> = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| Error::AllocationFailed { bytes, classes })?;
    buf.resize(len, 0.0);
    Array3::from_shape_vec((classes, height, width), buf).map_err(|_| Error::ShapeMismatch {
        expected: vec![classes, height, width],
        actual: vec![len],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiling::plan::AxisSpan;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn tile(row: usize, col: usize, keep: (usize, usize)) -> Tile {
        Tile {
            rows: AxisSpan { origin: row, keep_start: keep.0, keep_end: keep.1 },
            cols: AxisSpan { origin: col, keep_start: keep.0, keep_end: keep.1 },
        }
    }

    #[test]
    fn first_tile_allocates_with_its_class_count() {
        let mut vol = ProbabilityVolume::new(8, 8);
        assert!(!vol.is_allocated());
        let probs = Array3::from_elem((3, 4, 4), 0.5f32);
        vol.accumulate(&tile(2, 2, (0, 4)), probs.view()).unwrap();
        assert_eq!(vol.num_classes(), Some(3));
        let arr = vol.as_array().unwrap();
        assert_eq!(arr[[1, 2, 2]], 0.5);
        assert_eq!(arr[[1, 5, 5]], 0.5);
        assert_eq!(arr[[1, 6, 6]], 0.0);
        assert_eq!(arr[[1, 1, 1]], 0.0);
    }

    #[test]
    fn overlaps_sum_and_margins_are_cropped() {
        let mut vol = ProbabilityVolume::new(6, 6);
        let ones = Array3::from_elem((2, 4, 4), 1.0f32);
        vol.accumulate(&tile(0, 0, (0, 4)), ones.view()).unwrap();
        // Keeps only tile-local [1, 3) → window [3, 5).
        vol.accumulate(&tile(2, 2, (1, 3)), ones.view()).unwrap();
        let arr = vol.as_array().unwrap();
        assert_eq!(arr[[0, 3, 3]], 2.0);
        assert_eq!(arr[[0, 2, 2]], 1.0);
        assert_eq!(arr[[0, 4, 4]], 1.0);
        assert_eq!(arr[[0, 5, 5]], 0.0);
    }

    #[test]
    fn class_count_change_is_an_inference_failure() {
        let mut vol = ProbabilityVolume::new(4, 4);
        vol.accumulate(&tile(0, 0, (0, 4)), Array3::zeros((3, 4, 4)).view()).unwrap();
        let err = vol.accumulate(&tile(0, 0, (0, 4)), Array3::zeros((4, 4, 4)).view()).unwrap_err();
        assert!(matches!(err, Error::InferenceFailure { .. }));
    }

    #[test]
    fn undersized_map_is_rejected() {
        let mut vol = ProbabilityVolume::new(8, 8);
        let err = vol.accumulate(&tile(0, 0, (0, 4)), Array3::zeros((2, 3, 3)).view()).unwrap_err();
        assert!(matches!(err, Error::InferenceFailure { .. }));
        assert!(!vol.is_allocated());
    }

    #[test]
    fn accumulation_is_order_independent() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut items: Vec<(Tile, Array3<f32>)> = Vec::new();
        for r in (0..24).step_by(4) {
            for c in (0..24).step_by(4) {
                let probs = Array3::from_shape_fn((3, 8, 8), |_| (rng.gen_range(0..16) as f32) / 16.0);
                let keep = (rng.gen_range(0..2), rng.gen_range(6..=8));
                items.push((tile(r, c, keep), probs));
            }
        }

        let run = |order: &[(Tile, Array3<f32>)]| {
            let mut vol = ProbabilityVolume::new(32, 32);
            for (t, p) in order {
                vol.accumulate(t, p.view()).unwrap();
            }
            vol.into_array().unwrap()
        };

        let reference = run(&items);
        for _ in 0..5 {
            items.shuffle(&mut rng);
            // Sixteenths sum exactly in f32, so equality is exact.
            assert_eq!(run(&items), reference);
        }
    }
}
