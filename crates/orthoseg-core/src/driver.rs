//! Region driver: runs the full pipeline plot by plot.
//!
//! Each plot is reprojected, windowed, pre-flighted, rasterized, tiled
//! through the inference service, fused and vectorized. A failure in any of
//! those steps skips that plot only; configuration errors abort the run.
use geo_types::Polygon;
use ndarray::Array2;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::coords::{index, map_to_pixel, Affine};
use crate::error::{BoxError, Error, Result};
use crate::fusion::fuse;
use crate::inference::InferenceService;
use crate::plot::{polygon_bounds, Plot, PlotLayer};
use crate::raster::{PixelWindow, RasterSource};
use crate::rasterize::rasterize_region;
use crate::reproject::{same_crs, Reprojector};
use crate::stats::{class_statistics, ClassStats};
use crate::tiling::{run_tiled_inference, TilingStats};
use crate::vectorize::vectorize;

// ── Results ─────────────────────────────────────────────────────────────────

/// What the sink sees for every successfully classified plot.
#[derive(Debug)]
pub struct ClassifiedPlot<'a> {
    pub plot: &'a Plot,
    pub window: PixelWindow,
    /// Pixel → map transform with the origin at the window's top-left.
    pub transform: Affine,
    pub crs: &'a str,
    pub mask: &'a Array2<bool>,
    pub classification: &'a Array2<u8>,
    pub stats: &'a [ClassStats],
}

/// A result polygon with the originating plot's attributes plus result fields.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotPolygon {
    pub plot_index: usize,
    pub class: u8,
    pub polygon: Polygon<f64>,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPlot {
    pub index: usize,
    /// [`Error::kind`] tag.
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotSummary {
    pub index: usize,
    pub window: PixelWindow,
    pub tiling: TilingStats,
    pub polygons: usize,
    pub classes: Vec<ClassStats>,
}

/// Outcome of one [`process_plots`] run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: Vec<SkippedPlot>,
    /// All result polygons in plot order; empty when every plot was skipped.
    pub polygons: Vec<PlotPolygon>,
    pub summaries: Vec<PlotSummary>,
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Classify and vectorize every plot of `layer` over `raster`.
///
/// `sink` receives each classified plot before its polygons are appended
/// (the tool writes the per-plot classification raster there); a sink error
/// skips that plot like any other plot-level failure.
pub fn process_plots<R, S, P, F>(
    raster: &R,
    service: &mut S,
    layer: &PlotLayer,
    reprojector: &P,
    config: &PipelineConfig,
    mut sink: F,
) -> Result<BatchReport>
where
    R: RasterSource + ?Sized,
    S: InferenceService + ?Sized,
    P: Reprojector + ?Sized,
    F: FnMut(&ClassifiedPlot<'_>) -> std::result::Result<(), BoxError>,
{
    config.validate()?;
    let inverse = raster
        .transform()
        .inverse()
        .ok_or_else(|| Error::RasterRead("raster transform is not invertible".into()))?;

    let mut report = BatchReport::default();
    for plot in &layer.plots {
        info!(plot = plot.index, "processing plot");
        let result = process_plot(raster, service, &layer.crs, plot, reprojector, config, &inverse, &mut sink);
        match result {
            Ok(done) => {
                info!(
                    plot = plot.index,
                    polygons = done.polygons.len(),
                    tiles = done.summary.tiling.tiles_inferred,
                    "plot done"
                );
                report.processed += 1;
                report.polygons.extend(done.polygons);
                report.summaries.push(done.summary);
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(plot = plot.index, kind = e.kind(), "skipping plot: {e}");
                report.skipped.push(SkippedPlot {
                    index: plot.index,
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    info!(processed = report.processed, skipped = report.skipped.len(), "run finished");
    Ok(report)
}

struct PlotOutput {
    polygons: Vec<PlotPolygon>,
    summary: PlotSummary,
}

#[allow(clippy::too_many_arguments)]
fn process_plot<R, S, P, F>(
    raster: &R,
    service: &mut S,
    layer_crs: &str,
    plot: &Plot,
    reprojector: &P,
    config: &PipelineConfig,
    inverse: &Affine,
    sink: &mut F,
) -> Result<PlotOutput>
where
    R: RasterSource + ?Sized,
    S: InferenceService + ?Sized,
    P: Reprojector + ?Sized,
    F: FnMut(&ClassifiedPlot<'_>) -> std::result::Result<(), BoxError>,
{
    let polygon = if same_crs(layer_crs, raster.crs()) {
        plot.polygon.clone()
    } else {
        reprojector.reproject(&plot.polygon, layer_crs, raster.crs())?
    };

    let window = plot_window(&polygon, inverse)?.enlarged_to(config.min_window());
    config.tiling.preflight(window.width, window.height)?;

    let mask = rasterize_region(&polygon, |x, y| map_to_pixel(inverse, x, y), &window);
    let outcome = run_tiled_inference(raster, service, &window, &mask, &config.tiling)?;
    let labels = fuse(&outcome.volume, &mask)?;
    drop(outcome.volume);

    let transform = raster.transform();
    let stats = class_statistics(&labels, &mask, transform.pixel_area())?;
    sink(&ClassifiedPlot {
        plot,
        window,
        transform: transform.window_transform(window.row_off, window.col_off),
        crs: raster.crs(),
        mask: &mask,
        classification: &labels,
        stats: &stats,
    })
    .map_err(Error::Sink)?;

    let class_fields = class_fields(&stats);
    let polygons: Vec<PlotPolygon> = vectorize(&labels, &transform, &window, &config.vectorize)
        .into_iter()
        .map(|rp| {
            let mut attributes = plot.attributes.clone();
            attributes.insert("class".into(), json!(rp.class));
            if let Some(name) = config.class_name(rp.class) {
                attributes.insert("class_name".into(), json!(name));
            }
            attributes.insert("area_px".into(), json!(rp.area_px));
            attributes.extend(class_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            PlotPolygon {
                plot_index: plot.index,
                class: rp.class,
                polygon: rp.polygon,
                attributes,
            }
        })
        .collect();

    Ok(PlotOutput {
        summary: PlotSummary {
            index: plot.index,
            window,
            tiling: outcome.stats,
            polygons: polygons.len(),
            classes: stats,
        },
        polygons,
    })
}

/// Pixel window spanned by the polygon's bounding box.
///
/// The box corners are mapped with [`index`]; the resulting rows and columns
/// are used as half-open bounds. The window is not clipped to the raster.
pub fn plot_window(polygon: &Polygon<f64>, inverse: &Affine) -> Result<PixelWindow> {
    let bounds = polygon_bounds(polygon).ok_or_else(|| Error::EmptyRegion("plot has no vertices".into()))?;
    let (min, max) = (bounds.min(), bounds.max());
    let corners = [
        index(inverse, min.x, max.y),
        index(inverse, max.x, min.y),
        index(inverse, min.x, min.y),
        index(inverse, max.x, max.y),
    ];
    let min_row = corners.iter().map(|c| c.0).min().unwrap_or(0);
    let max_row = corners.iter().map(|c| c.0).max().unwrap_or(0);
    let min_col = corners.iter().map(|c| c.1).min().unwrap_or(0);
    let max_col = corners.iter().map(|c| c.1).max().unwrap_or(0);

    PixelWindow::from_bounds(min_col, min_row, max_col, max_row).ok_or_else(|| {
        Error::EmptyRegion(format!(
            "bounding box maps to rows {min_row}..{max_row}, cols {min_col}..{max_col}"
        ))
    })
}

/// `class_<id>_ha` / `class_<id>_pct` for every class present in the plot.
fn class_fields(stats: &[ClassStats]) -> Vec<(String, Value)> {
    stats
        .iter()
        .flat_map(|s| {
            [
                (format!("class_{}_ha", s.class_id), json!(s.area_ha)),
                (format!("class_{}_pct", s.class_id), json!(s.percentage)),
            ]
        })
        .collect()
}
