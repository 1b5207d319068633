//! Plot segmentation tool: classifies an RGB orthophoto inside every plot of a
//! GeoJSON boundary layer and writes per-plot class rasters, a polygon layer
//! and a run report.
//!
//! Inputs are either given explicitly (`--raster`, `--plots`) or discovered in
//! an area folder (`--area-dir`, first `.tif` and first `.geojson`).
mod centroid;
mod geotiff;
mod layers;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use orthoseg_core::{
    process_plots, BatchReport, BoxError, ProjReprojector, PipelineConfig, PixelAnchor, PlotSummary, RasterSource,
    SkippedPlot,
};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::centroid::{CentroidModel, NearestCentroid};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "plot_segment",
    about = "Tiled orthophoto classification constrained to plot boundaries"
)]
struct Args {
    /// Orthophoto GeoTIFF (8-bit RGB or gray)
    #[arg(long)]
    raster: Option<PathBuf>,

    /// Plot boundaries (GeoJSON FeatureCollection of polygons)
    #[arg(long)]
    plots: Option<PathBuf>,

    /// Folder holding one orthophoto and one plot layer; used for whichever
    /// of --raster / --plots is missing
    #[arg(long)]
    area_dir: Option<PathBuf>,

    /// Nearest-centroid model (JSON: {"centroids": [[r,g,b], ...]})
    #[arg(long)]
    model: PathBuf,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Pipeline configuration JSON; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tile edge in pixels
    #[arg(long)]
    tile_size: Option<usize>,

    /// Pixels shared by neighbouring tiles
    #[arg(long)]
    overlap: Option<usize>,

    /// Tiles per inference call
    #[arg(long)]
    batch_size: Option<usize>,

    /// Minimum component area in square pixels
    #[arg(long)]
    min_area: Option<f64>,

    /// Vertex anchor inside border pixels: center, ul, ur, ll, lr
    #[arg(long)]
    anchor: Option<String>,

    /// Probability volume budget per plot, in GiB
    #[arg(long)]
    memory_budget_gib: Option<f64>,

    /// CRS of the plot layer when the file does not declare one (e.g. EPSG:31982)
    #[arg(long)]
    plots_crs: Option<String>,
}

// ── Report ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RunReport<'a> {
    raster: String,
    plots: String,
    crs: &'a str,
    config: &'a PipelineConfig,
    processed: usize,
    skipped: &'a [SkippedPlot],
    polygons: usize,
    summaries: &'a [PlotSummary],
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    if let Some(v) = args.tile_size {
        config.tiling.tile_size = v;
    }
    if let Some(v) = args.overlap {
        config.tiling.overlap = v;
    }
    if let Some(v) = args.batch_size {
        config.tiling.batch_size = v;
    }
    if let Some(v) = args.min_area {
        config.vectorize.min_area = v;
    }
    if let Some(token) = &args.anchor {
        config.vectorize.anchor = token.parse::<PixelAnchor>()?;
    }
    if let Some(gib) = args.memory_budget_gib {
        config.tiling.memory_budget_bytes = (gib * (1u64 << 30) as f64) as u64;
    }
    config.validate()?;
    Ok(config)
}

/// First file in `dir` (name order) whose extension is one of `exts`.
fn find_first(dir: &Path, exts: &[&str]) -> Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Cannot list {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    entries.sort();
    Ok(entries.into_iter().find(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| exts.iter().any(|x| e.eq_ignore_ascii_case(x)))
    }))
}

fn resolve_inputs(args: &Args) -> Result<(PathBuf, PathBuf)> {
    let discover = |exts: &[&str], what: &str| -> Result<PathBuf> {
        let dir = args
            .area_dir
            .as_deref()
            .with_context(|| format!("no {what} given and no --area-dir to search"))?;
        find_first(dir, exts)?.with_context(|| format!("no {what} found in {}", dir.display()))
    };
    let raster = match &args.raster {
        Some(p) => p.clone(),
        None => discover(&["tif", "tiff"], "orthophoto")?,
    };
    let plots = match &args.plots {
        Some(p) => p.clone(),
        None => discover(&["geojson", "json"], "plot layer")?,
    };
    Ok((raster, plots))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let (raster_path, plots_path) = resolve_inputs(&args)?;
    let model = CentroidModel::load(&args.model)?;
    info!(classes = model.centroids.len(), "centroid model loaded");

    let raster = geotiff::open_orthophoto(&raster_path)?;
    info!(
        path = %raster_path.display(),
        width = raster.width(),
        height = raster.height(),
        bands = raster.band_count(),
        crs = raster.crs(),
        "orthophoto opened"
    );
    let layer = layers::read_plots(&plots_path, args.plots_crs.as_deref())?;
    info!(path = %plots_path.display(), plots = layer.len(), crs = %layer.crs, "plots loaded");
    if layer.is_empty() {
        warn!("plot layer is empty, nothing to do");
    }

    fs::create_dir_all(&args.output).with_context(|| format!("Cannot create {}", args.output.display()))?;

    let mut service = NearestCentroid::new(model);
    let output = args.output.clone();
    let report: BatchReport = process_plots(&raster, &mut service, &layer, &ProjReprojector, &config, |plot| {
        let path = output.join(format!("plot_{}_classes.tif", plot.plot.index));
        geotiff::write_classification(&path, plot.classification, &plot.transform, plot.crs)
            .map_err(BoxError::from)
    })?;

    let polygons_path = args.output.join("predictions.geojson");
    layers::write_polygons(&polygons_path, &report.polygons, raster.crs())?;

    let run = RunReport {
        raster: raster_path.display().to_string(),
        plots: plots_path.display().to_string(),
        crs: raster.crs(),
        config: &config,
        processed: report.processed,
        skipped: &report.skipped,
        polygons: report.polygons.len(),
        summaries: &report.summaries,
    };
    let report_path = args.output.join("report.json");
    fs::write(&report_path, serde_json::to_string_pretty(&run)?)
        .with_context(|| format!("Cannot write {}", report_path.display()))?;

    for s in &report.skipped {
        warn!(plot = s.index, kind = %s.kind, "skipped: {}", s.message);
    }
    info!(
        processed = report.processed,
        skipped = report.skipped.len(),
        polygons = report.polygons.len(),
        output = %args.output.display(),
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["plot_segment", "--model", "m.json"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = load_config(&args(&["--tile-size", "512", "--overlap", "0", "--anchor", "ul"])).unwrap();
        assert_eq!(cfg.tiling.tile_size, 512);
        assert_eq!(cfg.tiling.overlap, 0);
        assert_eq!(cfg.vectorize.anchor, PixelAnchor::UpperLeft);
        assert_eq!(cfg.tiling.batch_size, 32);
    }

    #[test]
    fn bad_anchor_token_is_rejected() {
        let err = load_config(&args(&["--anchor", "middle"])).unwrap_err();
        assert!(err.to_string().contains("middle"));
    }

    #[test]
    fn budget_flag_is_in_gib() {
        let cfg = load_config(&args(&["--memory-budget-gib", "2"])).unwrap();
        assert_eq!(cfg.tiling.memory_budget_bytes, 2 << 30);
    }

    #[test]
    fn area_dir_discovery_picks_first_match() {
        let dir = std::env::temp_dir().join(format!("plot_segment_discovery_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in ["b.tif", "a.TIF", "notes.txt", "plots.geojson"] {
            fs::write(dir.join(name), b"").unwrap();
        }
        let a = args(&["--area-dir", dir.to_str().unwrap()]);
        let (raster, plots) = resolve_inputs(&a).unwrap();
        assert_eq!(raster.file_name().unwrap(), "a.TIF");
        assert_eq!(plots.file_name().unwrap(), "plots.geojson");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_inputs_without_area_dir_fail() {
        assert!(resolve_inputs(&args(&[])).is_err());
    }
}
