//! Classification raster → map-coordinate polygons with holes.
//!
//! Borders are traced per class with Suzuki–Abe border following
//! (`imageproc::contours`), which tags every border as outer or hole and
//! links each hole to the outer border it sits in.
use geo_types::{LineString, Polygon};
use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType, Contour};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::coords::{pixels_to_map, Affine, PixelAnchor};
use crate::fusion::BACKGROUND;
use crate::raster::PixelWindow;

/// Smallest ring accepted, counting the repeated closing vertex.
const MIN_RING_VERTICES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizeOptions {
    /// Outer borders enclosing less than this many square pixels are dropped.
    pub min_area: f64,
    /// Where inside each border pixel the polygon vertex is placed.
    pub anchor: PixelAnchor,
}

impl Default for VectorizeOptions {
    fn default() -> Self {
        Self { min_area: 5.0, anchor: PixelAnchor::Center }
    }
}

/// One connected component of one class.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPolygon {
    pub class: u8,
    /// Area of the exterior border in square pixels (holes not subtracted).
    pub area_px: f64,
    pub polygon: Polygon<f64>,
}

/// Vectorize every non-background class of `labels`.
///
/// `labels` covers `window` of the raster whose pixel → map transform is
/// `transform`. Output is ordered by class id, then by tracing order.
pub fn vectorize(
    labels: &Array2<u8>,
    transform: &Affine,
    window: &PixelWindow,
    options: &VectorizeOptions,
) -> Vec<ResultPolygon> {
    let mut present = [false; 256];
    for &v in labels.iter() {
        present[v as usize] = true;
    }

    let classes: Vec<u8> = (0..=255u8).filter(|&c| present[c as usize] && c != BACKGROUND).collect();
    let polygons_of = |&class: &u8| class_polygons(labels, class, transform, window, options);

    #[cfg(feature = "threading")]
    let per_class: Vec<Vec<ResultPolygon>> = {
        use rayon::prelude::*;
        classes.par_iter().map(polygons_of).collect()
    };
    #[cfg(not(feature = "threading"))]
    let per_class: Vec<Vec<ResultPolygon>> = classes.iter().map(polygons_of).collect();

    per_class.into_iter().flatten().collect()
}

/// Outer borders of `class` at least `min_area` large, with their holes.
fn class_polygons(
    labels: &Array2<u8>,
    class: u8,
    transform: &Affine,
    window: &PixelWindow,
    options: &VectorizeOptions,
) -> Vec<ResultPolygon> {
    let contours = trace_class(labels, class);
    let mut out = Vec::new();
    for (idx, outer) in contours.iter().enumerate() {
        if outer.border_type != BorderType::Outer {
            continue;
        }
        let area_px = ring_area(&outer.points);
        if area_px < options.min_area {
            continue;
        }
        let Some(exterior) = to_ring(outer, transform, window, options.anchor) else {
            continue;
        };
        let holes: Vec<LineString<f64>> = contours
            .iter()
            .filter(|c| c.border_type == BorderType::Hole && c.parent == Some(idx))
            .filter_map(|c| to_ring(c, transform, window, options.anchor))
            .collect();
        out.push(ResultPolygon {
            class,
            area_px,
            polygon: Polygon::new(exterior, holes),
        });
    }
    out
}

/// Borders of `class` in window pixel coordinates (`x` = col, `y` = row).
///
/// The binary image gets a one-pixel background frame so components touching
/// the window edge are traced like any other.
fn trace_class(labels: &Array2<u8>, class: u8) -> Vec<Contour<i32>> {
    let (height, width) = labels.dim();
    let img = GrayImage::from_fn(width as u32 + 2, height as u32 + 2, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let on = x >= 1 && y >= 1 && x <= width && y <= height && labels[[y - 1, x - 1]] == class;
        Luma([if on { 255 } else { 0 }])
    });
    let mut contours = find_contours::<i32>(&img);
    for contour in &mut contours {
        for p in &mut contour.points {
            p.x -= 1;
            p.y -= 1;
        }
    }
    contours
}

/// Closed map-coordinate ring, or `None` if it degenerates.
fn to_ring(
    contour: &Contour<i32>,
    transform: &Affine,
    window: &PixelWindow,
    anchor: PixelAnchor,
) -> Option<LineString<f64>> {
    let mut pixels: Vec<(f64, f64)> = contour
        .points
        .iter()
        .map(|p| ((p.y as i64 + window.row_off) as f64, (p.x as i64 + window.col_off) as f64))
        .collect();
    if let Some(&first) = pixels.first() {
        if pixels.last() != Some(&first) {
            pixels.push(first);
        }
    }
    if pixels.len() < MIN_RING_VERTICES {
        return None;
    }
    Some(LineString::from(pixels_to_map(transform, &pixels, anchor)))
}

/// Shoelace area of a traced border, in square pixels.
fn ring_area(points: &[imageproc::point::Point<i32>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: i64 = (0..n)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % n]);
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::map_to_pixel;
    use crate::rasterize::rasterize_region;
    use approx::assert_abs_diff_eq;
    use geo_types::polygon;

    fn block(labels: &mut Array2<u8>, rows: std::ops::Range<usize>, cols: std::ops::Range<usize>, v: u8) {
        for r in rows {
            for c in cols.clone() {
                labels[[r, c]] = v;
            }
        }
    }

    fn bounds(ring: &LineString<f64>) -> (f64, f64, f64, f64) {
        ring.coords().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), c| (x0.min(c.x), y0.min(c.y), x1.max(c.x), y1.max(c.y)),
        )
    }

    #[test]
    fn classes_ascending_and_background_ignored() {
        let mut labels = Array2::<u8>::zeros((20, 20));
        block(&mut labels, 2..8, 2..8, 3);
        block(&mut labels, 10..18, 10..18, 1);
        let polys = vectorize(&labels, &Affine::identity(), &PixelWindow::new(0, 0, 20, 20), &Default::default());
        let classes: Vec<u8> = polys.iter().map(|p| p.class).collect();
        assert_eq!(classes, vec![1, 3]);
    }

    #[test]
    fn block_maps_through_transform_and_window_offset() {
        let mut labels = Array2::<u8>::zeros((10, 10));
        block(&mut labels, 2..6, 3..8, 2);
        let t = Affine::north_up(100.0, 200.0, 1.0, -1.0);
        let window = PixelWindow::new(40, 30, 10, 10);
        let opts = VectorizeOptions { anchor: PixelAnchor::UpperLeft, ..Default::default() };
        let polys = vectorize(&labels, &t, &window, &opts);
        assert_eq!(polys.len(), 1);
        let (x0, y0, x1, y1) = bounds(polys[0].polygon.exterior());
        // Border pixel corners: cols 43..=47, rows 32..=35.
        assert_abs_diff_eq!(x0, 143.0);
        assert_abs_diff_eq!(x1, 147.0);
        assert_abs_diff_eq!(y1, 168.0);
        assert_abs_diff_eq!(y0, 165.0);
        assert!(polys[0].polygon.exterior().is_closed());
    }

    #[test]
    fn small_components_are_dropped() {
        let mut labels = Array2::<u8>::zeros((10, 10));
        labels[[1, 1]] = 1;
        block(&mut labels, 4..6, 4..6, 1); // 2x2 block: border area 1
        block(&mut labels, 0..10, 8..10, 2); // 2x10 strip: border area 9
        let polys = vectorize(&labels, &Affine::identity(), &PixelWindow::new(0, 0, 10, 10), &Default::default());
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].class, 2);
        assert_abs_diff_eq!(polys[0].area_px, 9.0);
    }

    #[test]
    fn hole_is_attached_to_its_component() {
        let mut labels = Array2::<u8>::zeros((30, 30));
        block(&mut labels, 2..28, 2..28, 1);
        block(&mut labels, 10..20, 10..20, 0);
        // Island of another class inside the hole.
        block(&mut labels, 13..17, 13..17, 2);
        let polys = vectorize(&labels, &Affine::identity(), &PixelWindow::new(0, 0, 30, 30), &Default::default());
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].class, 1);
        assert_eq!(polys[0].polygon.interiors().len(), 1);
        assert_eq!(polys[1].class, 2);
        assert!(polys[1].polygon.interiors().is_empty());
    }

    #[test]
    fn island_inside_hole_of_same_class_is_its_own_polygon() {
        let mut labels = Array2::<u8>::zeros((30, 30));
        block(&mut labels, 1..29, 1..29, 1);
        block(&mut labels, 6..24, 6..24, 0);
        block(&mut labels, 10..20, 10..20, 1);
        let polys = vectorize(&labels, &Affine::identity(), &PixelWindow::new(0, 0, 30, 30), &Default::default());
        assert_eq!(polys.len(), 2);
        assert_eq!(polys[0].polygon.interiors().len() + polys[1].polygon.interiors().len(), 1);
    }

    #[test]
    fn component_touching_window_edge_is_closed() {
        let labels = Array2::<u8>::from_elem((8, 8), 4);
        let polys = vectorize(&labels, &Affine::identity(), &PixelWindow::new(0, 0, 8, 8), &Default::default());
        assert_eq!(polys.len(), 1);
        assert_abs_diff_eq!(polys[0].area_px, 49.0);
        let (x0, y0, x1, y1) = bounds(polys[0].polygon.exterior());
        assert_eq!((x0, y0, x1, y1), (0.5, 0.5, 7.5, 7.5));
    }

    #[test]
    fn revectorizing_own_rasterization_is_stable() {
        // Irregular blob: a disc with a notch.
        let mut labels = Array2::<u8>::zeros((64, 64));
        for r in 0..64 {
            for c in 0..64 {
                let (dy, dx) = (r as f64 - 32.0, c as f64 - 30.0);
                if dx * dx + dy * dy < 400.0 && !(c > 30 && (28..36).contains(&r)) {
                    labels[[r, c]] = 1;
                }
            }
        }
        let t = Affine::north_up(300_000.0, 8_000_000.0, 0.1, -0.1);
        let inv = t.inverse().unwrap();
        let window = PixelWindow::new(1000, 2000, 64, 64);
        let opts = VectorizeOptions::default();

        let first = vectorize(&labels, &t, &window, &opts);
        assert_eq!(first.len(), 1);
        let mask = rasterize_region(&first[0].polygon, |x, y| map_to_pixel(&inv, x, y), &window);
        let again_labels = mask.mapv(|v| v as u8);
        let second = vectorize(&again_labels, &t, &window, &opts);
        assert_eq!(second.len(), 1);

        // Pixel-centre polygons lose at most one pixel per side per round trip.
        let (a, b) = (bounds(first[0].polygon.exterior()), bounds(second[0].polygon.exterior()));
        for (u, v) in [(a.0, b.0), (a.1, b.1), (a.2, b.2), (a.3, b.3)] {
            assert!((u - v).abs() <= 0.1 + 1e-9, "bounds moved {u} -> {v}");
        }
        let ratio = second[0].area_px / first[0].area_px;
        assert!(ratio > 0.85 && ratio <= 1.0, "area ratio {ratio}");
    }

    #[test]
    fn plot_with_hole_roundtrips_to_one_polygon_with_one_hole() {
        let t = Affine::north_up(0.0, 64.0, 1.0, -1.0);
        let inv = t.inverse().unwrap();
        let exterior = polygon![(x: 8.0, y: 56.0), (x: 56.0, y: 56.0), (x: 56.0, y: 8.0), (x: 8.0, y: 8.0)];
        let plot = Polygon::new(
            exterior.exterior().clone(),
            vec![LineString::from(vec![(24.0, 40.0), (40.0, 40.0), (40.0, 24.0), (24.0, 24.0), (24.0, 40.0)])],
        );
        let window = PixelWindow::new(0, 0, 64, 64);
        let mask = rasterize_region(&plot, |x, y| map_to_pixel(&inv, x, y), &window);
        let labels = mask.mapv(|v| v as u8);
        let polys = vectorize(&labels, &t, &window, &Default::default());
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].polygon.interiors().len(), 1);
    }
}
