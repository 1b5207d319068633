//! The segmentation model seen from the pipeline: an opaque, stateful
//! service that turns a batch of tiles into per-class probability maps.
use ndarray::Array3;

use crate::error::BoxError;
use crate::patch::Patch;

pub trait InferenceService {
    /// Score a batch of tiles.
    ///
    /// Must return exactly one map per input tile, each shaped
    /// `[num_classes, tile_h, tile_w]`, softmax-normalised over the class
    /// axis. The class count is not declared up front; the pipeline learns
    /// it from the first response.
    fn infer(&mut self, batch: &[Patch]) -> Result<Vec<Array3<f32>>, BoxError>;
}

impl<S: InferenceService + ?Sized> InferenceService for &mut S {
    fn infer(&mut self, batch: &[Patch]) -> Result<Vec<Array3<f32>>, BoxError> {
        (**self).infer(batch)
    }
}

impl<S: InferenceService + ?Sized> InferenceService for Box<S> {
    fn infer(&mut self, batch: &[Patch]) -> Result<Vec<Array3<f32>>, BoxError> {
        (**self).infer(batch)
    }
}
