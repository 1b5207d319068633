//! Tiled segmentation of large georeferenced rasters into per-class polygons,
//! constrained to irregular plot boundaries.
//!
//! Pipeline per plot: [`driver`] → [`rasterize`] + [`patch`] → [`tiling`] →
//! [`fusion`] → [`vectorize`]. Model inference and raster access sit behind
//! the [`InferenceService`] and [`RasterSource`] traits.
pub mod config;
pub mod coords;
pub mod driver;
pub mod error;
pub mod fusion;
pub mod inference;
pub mod patch;
pub mod plot;
pub mod raster;
pub mod rasterize;
pub mod reproject;
pub mod stats;
pub mod tiling;
pub mod vectorize;

pub use config::PipelineConfig;
pub use coords::{index, map_to_pixel, pixel_to_map, pixels_to_map, Affine, PixelAnchor};
pub use driver::{plot_window, process_plots, BatchReport, ClassifiedPlot, PlotPolygon, PlotSummary, SkippedPlot};
pub use error::{BoxError, Error, Result};
pub use fusion::{fuse, BACKGROUND};
pub use inference::InferenceService;
pub use patch::{read_patch, Patch};
pub use plot::{Plot, PlotLayer};
pub use raster::{InMemoryRaster, PixelWindow, RasterSource};
pub use rasterize::rasterize_region;
pub use reproject::{Crs, ProjReprojector, Reprojector, Transformer};
pub use stats::{class_statistics, ClassStats};
pub use tiling::{run_tiled_inference, ProbabilityVolume, TilingConfig, TilingOutcome, TilingStats};
pub use vectorize::{vectorize, ResultPolygon, VectorizeOptions};
