use thiserror::Error;

/// Boxed error returned by external collaborators (inference backends,
/// raster readers, output sinks).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure the pipeline can raise.
///
/// `InvalidOffset` and `InvalidTilingConfig` are setup errors and abort a
/// run. Everything else is scoped to a single plot: the region driver
/// records the plot as skipped and moves on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pixel offset {0:?} (expected center, ul, ur, ll or lr)")]
    InvalidOffset(String),

    #[error("invalid tiling configuration: {0}")]
    InvalidTilingConfig(String),

    #[error("plot needs ~{:.1} GiB for the probability volume, budget is {:.1} GiB", gib(.required), gib(.budget))]
    MemoryBudgetExceeded { required: u64, budget: u64 },

    #[error("could not allocate {bytes} bytes for a {classes}-class probability volume")]
    AllocationFailed { bytes: u64, classes: usize },

    #[error("plot covers no pixels: {0}")]
    EmptyRegion(String),

    #[error("no tile contributed a prediction to this plot")]
    EmptyVolume,

    #[error("inference failed: {message}")]
    InferenceFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("raster read failed: {0}")]
    RasterRead(#[source] BoxError),

    #[error("cannot reproject from {from} to {to}: {reason}")]
    Reprojection { from: String, to: String, reason: String },

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    #[error("writing plot results failed: {0}")]
    Sink(#[source] BoxError),
}

impl Error {
    pub(crate) fn inference(message: impl Into<String>) -> Self {
        Error::InferenceFailure { message: message.into(), source: None }
    }

    /// Setup errors that must abort the whole run rather than skip a plot.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidOffset(_) | Error::InvalidTilingConfig(_))
    }

    /// Stable snake_case tag used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidOffset(_) => "invalid_offset",
            Error::InvalidTilingConfig(_) => "invalid_tiling_config",
            Error::MemoryBudgetExceeded { .. } => "memory_budget_exceeded",
            Error::AllocationFailed { .. } => "allocation_failed",
            Error::EmptyRegion(_) => "empty_region",
            Error::EmptyVolume => "empty_volume",
            Error::InferenceFailure { .. } => "inference_failure",
            Error::RasterRead(_) => "raster_read",
            Error::Reprojection { .. } => "reprojection",
            Error::ShapeMismatch { .. } => "shape_mismatch",
            Error::Sink(_) => "sink",
        }
    }
}

fn gib(bytes: &u64) -> f64 {
    *bytes as f64 / (1u64 << 30) as f64
}
