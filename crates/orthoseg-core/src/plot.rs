//! Plot boundary layer: one polygon plus free-form attributes per record.
use geo_types::{MultiPolygon, Polygon, Rect};
use serde_json::{Map, Value};

/// One region of interest.
#[derive(Debug, Clone, PartialEq)]
pub struct Plot {
    /// Position in the layer after multi-part plots are exploded.
    pub index: usize,
    pub polygon: Polygon<f64>,
    /// Source feature properties, passed through to every result polygon.
    pub attributes: Map<String, Value>,
}

impl Plot {
    /// Map-coordinate bounding box of the exterior, `None` for an empty ring.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        polygon_bounds(&self.polygon)
    }
}

/// Ordered plots sharing one CRS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlotLayer {
    pub crs: String,
    pub plots: Vec<Plot>,
}

impl PlotLayer {
    pub fn new(crs: impl Into<String>) -> Self {
        Self { crs: crs.into(), plots: Vec::new() }
    }

    pub fn push(&mut self, polygon: Polygon<f64>, attributes: Map<String, Value>) {
        let index = self.plots.len();
        self.plots.push(Plot { index, polygon, attributes });
    }

    /// Append each part of a multi-part feature as its own plot, all
    /// carrying the same attributes.
    pub fn push_multi(&mut self, parts: MultiPolygon<f64>, attributes: Map<String, Value>) {
        for polygon in parts {
            self.push(polygon, attributes.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.plots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }
}

pub(crate) fn polygon_bounds(polygon: &Polygon<f64>) -> Option<Rect<f64>> {
    let mut coords = polygon.exterior().coords();
    let first = *coords.next()?;
    let (min, max) = coords.fold((first, first), |(lo, hi), c| {
        (
            geo_types::coord! { x: lo.x.min(c.x), y: lo.y.min(c.y) },
            geo_types::coord! { x: hi.x.max(c.x), y: hi.y.max(c.y) },
        )
    });
    Some(Rect::new(min, max))
}
