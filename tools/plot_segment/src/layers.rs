//! GeoJSON plot layers in, result polygon layers out.
//!
//! Plot files are a FeatureCollection (or a single Feature) whose polygonal
//! geometries become plots; MultiPolygons and GeometryCollections are
//! exploded into one plot per part. The legacy `crs` member is honoured on
//! read and written on output so GIS tools pick up projected coordinates.
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use geo_types::{Geometry, MultiPolygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use orthoseg_core::{PlotLayer, PlotPolygon};
use serde_json::json;
use tracing::warn;

/// CRS assumed when the file has no `crs` member (RFC 7946).
pub const DEFAULT_CRS: &str = "EPSG:4326";

pub fn read_plots(path: &Path, crs_override: Option<&str>) -> Result<PlotLayer> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    parse_plots(&text, crs_override).with_context(|| format!("Invalid plot layer {}", path.display()))
}

pub fn parse_plots(text: &str, crs_override: Option<&str>) -> Result<PlotLayer> {
    let (features, foreign) = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => {
            let foreign = f.foreign_members.clone();
            (vec![f], foreign)
        }
        GeoJson::Geometry(_) => bail!("expected a FeatureCollection, found a bare geometry"),
    };
    let crs = match crs_override {
        Some(c) => c.to_string(),
        None => foreign.as_ref().and_then(legacy_crs).unwrap_or_else(|| DEFAULT_CRS.to_string()),
    };

    let mut layer = PlotLayer::new(crs);
    for (i, feature) in features.into_iter().enumerate() {
        let attributes = feature.properties.unwrap_or_default();
        let Some(geometry) = feature.geometry else {
            warn!(feature = i, "feature without geometry skipped");
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geometry).with_context(|| format!("feature {i}: bad geometry"))?;
        match geometry {
            Geometry::Polygon(p) => layer.push(p, attributes),
            Geometry::MultiPolygon(parts) => layer.push_multi(parts, attributes),
            Geometry::GeometryCollection(members) => {
                let parts = polygonal_parts(members.0);
                if parts.0.is_empty() {
                    warn!(feature = i, "geometry collection without polygons skipped");
                } else {
                    layer.push_multi(parts, attributes);
                }
            }
            other => warn!(feature = i, kind = geometry_kind(&other), "non-polygon feature skipped"),
        }
    }
    Ok(layer)
}

fn polygonal_parts(members: Vec<Geometry<f64>>) -> MultiPolygon<f64> {
    members
        .into_iter()
        .flat_map(|g| match g {
            Geometry::Polygon(p) => vec![p],
            Geometry::MultiPolygon(mp) => mp.0,
            Geometry::GeometryCollection(gc) => polygonal_parts(gc.0).0,
            _ => Vec::new(),
        })
        .collect()
}

fn geometry_kind(g: &Geometry<f64>) -> &'static str {
    match g {
        Geometry::Point(_) => "Point",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::MultiLineString(_) => "MultiLineString",
        _ => "other",
    }
}

/// `EPSG:n` from a legacy `crs` member such as
/// `{"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::31982"}}`.
fn legacy_crs(foreign: &JsonObject) -> Option<String> {
    let name = foreign.get("crs")?.get("properties")?.get("name")?.as_str()?;
    if name.ends_with("CRS84") {
        return Some(DEFAULT_CRS.to_string());
    }
    let code = name.rsplit(':').next()?;
    code.parse::<u32>().ok().map(|c| format!("EPSG:{c}"))
}

// ── Writing ─────────────────────────────────────────────────────────────────

pub fn polygons_to_geojson(polygons: &[PlotPolygon], crs: &str) -> FeatureCollection {
    let features = polygons
        .iter()
        .map(|p| Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&p.polygon))),
            id: None,
            properties: Some(p.attributes.clone()),
            foreign_members: None,
        })
        .collect();

    let foreign_members = crs.strip_prefix("EPSG:").map(|code| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".into(),
            json!({ "type": "name", "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") } }),
        );
        members
    });
    FeatureCollection { bbox: None, features, foreign_members }
}

pub fn write_polygons(path: &Path, polygons: &[PlotPolygon], crs: &str) -> Result<()> {
    let collection = polygons_to_geojson(polygons, crs);
    fs::write(path, serde_json::to_string(&collection)?).with_context(|| format!("Cannot write {}", path.display()))
}
