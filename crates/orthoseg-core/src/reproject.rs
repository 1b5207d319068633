//! Plot geometry reprojection.
//!
//! CRSs are identified by EPSG code (`EPSG:31982`, or a bare `31982`) and
//! resolved to proj strings through the EPSG table bundled with `proj4rs`.
//! Transforms run in pure Rust; geographic CRSs take and return degrees.
use std::fmt;
use std::str::FromStr;

use geo_types::{Coord, LineString, Polygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{Error, Result};

const EPSG_WEB_MERCATOR: u16 = 3857;
/// Pre-registration alias of Web Mercator still written by older tools.
const GOOGLE_MERCATOR: u32 = 900_913;

/// An EPSG coordinate reference system with a known proj definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    code: u16,
}

impl Crs {
    /// `None` when the code is not in the EPSG table.
    pub fn from_epsg(code: u32) -> Option<Crs> {
        let code = match code {
            GOOGLE_MERCATOR => EPSG_WEB_MERCATOR,
            c => u16::try_from(c).ok()?,
        };
        Proj::from_epsg_code(code).ok().map(|_| Crs { code })
    }

    pub fn epsg(self) -> u16 {
        self.code
    }

    /// Longitude/latitude CRS, i.e. coordinates in degrees.
    pub fn is_geographic(self) -> bool {
        self.proj().is_ok_and(|p| p.is_latlong())
    }

    fn proj(self) -> std::result::Result<Proj, String> {
        Proj::from_epsg_code(self.code).map_err(|e| format!("EPSG:{}: {e:?}", self.code))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.code)
    }
}

/// Parses `EPSG:31982` style identifiers; a bare code also works.
impl FromStr for Crs {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        let code = match s.split_once(':') {
            Some((auth, code)) if auth.eq_ignore_ascii_case("epsg") => code,
            Some((auth, _)) => return Err(format!("unsupported authority {auth}")),
            None => s,
        };
        let code: u32 = code.trim().parse().map_err(|_| format!("bad EPSG code in {s:?}"))?;
        Crs::from_epsg(code).ok_or_else(|| format!("EPSG:{code} is not a known CRS"))
    }
}

// ── Point transforms ────────────────────────────────────────────────────────

/// Reusable transform between two CRSs.
pub struct Transformer {
    source: Proj,
    target: Proj,
    source_is_geographic: bool,
    target_is_geographic: bool,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("source_is_geographic", &self.source_is_geographic)
            .field("target_is_geographic", &self.target_is_geographic)
            .finish_non_exhaustive()
    }
}

impl Transformer {
    pub fn new(from: Crs, to: Crs) -> std::result::Result<Self, String> {
        let source = from.proj()?;
        let target = to.proj()?;
        Ok(Self {
            source_is_geographic: source.is_latlong(),
            target_is_geographic: target.is_latlong(),
            source,
            target,
        })
    }

    pub fn transform(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), String> {
        let mut point = if self.source_is_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&self.source, &self.target, &mut point).map_err(|e| format!("transform failed: {e:?}"))?;
        if !(point.0.is_finite() && point.1.is_finite()) {
            return Err(format!("({x}, {y}) has no finite image"));
        }
        Ok(if self.target_is_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        })
    }
}

// ── Reprojection seam ───────────────────────────────────────────────────────

/// Moves plot geometry from the layer CRS into the raster CRS.
pub trait Reprojector {
    fn reproject(&self, polygon: &Polygon<f64>, from: &str, to: &str) -> Result<Polygon<f64>>;
}

/// [`Reprojector`] backed by `proj4rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjReprojector;

impl Reprojector for ProjReprojector {
    fn reproject(&self, polygon: &Polygon<f64>, from: &str, to: &str) -> Result<Polygon<f64>> {
        if same_crs(from, to) {
            return Ok(polygon.clone());
        }
        let failed = |reason: String| Error::Reprojection { from: from.to_string(), to: to.to_string(), reason };
        let src: Crs = from.parse().map_err(failed)?;
        let dst: Crs = to.parse().map_err(failed)?;
        let transformer = Transformer::new(src, dst).map_err(failed)?;

        let ring = |ls: &LineString<f64>| -> Result<LineString<f64>> {
            ls.coords()
                .map(|c| transformer.transform(c.x, c.y).map(|(x, y)| Coord { x, y }))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(LineString::from)
                .map_err(failed)
        };
        let interiors = polygon.interiors().iter().map(ring).collect::<Result<Vec<_>>>()?;
        Ok(Polygon::new(ring(polygon.exterior())?, interiors))
    }
}

/// Case/whitespace-insensitive CRS identity. An empty identifier means
/// "unknown" and is taken to match anything.
pub fn same_crs(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a.is_empty() || b.is_empty() || a.eq_ignore_ascii_case(b) {
        return true;
    }
    matches!((a.parse::<Crs>(), b.parse::<Crs>()), (Ok(x), Ok(y)) if x == y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo_types::polygon;

    fn transformer(from: &str, to: &str) -> Transformer {
        Transformer::new(from.parse().unwrap(), to.parse().unwrap()).unwrap()
    }

    #[test]
    fn parses_epsg_identifiers() {
        assert_eq!("EPSG:31982".parse::<Crs>().unwrap().epsg(), 31982);
        assert_eq!(" epsg:2154 ".parse::<Crs>().unwrap().epsg(), 2154);
        assert_eq!("4674".parse::<Crs>().unwrap().epsg(), 4674);
        assert_eq!("EPSG:900913".parse::<Crs>().unwrap().epsg(), 3857);
        assert!("EPSG:99999".parse::<Crs>().is_err());
        assert!("ESRI:102100".parse::<Crs>().is_err());
        assert!("EPSG:abc".parse::<Crs>().is_err());
    }

    #[test]
    fn geographic_flag_follows_the_definition() {
        assert!(Crs::from_epsg(4326).unwrap().is_geographic());
        assert!(Crs::from_epsg(4674).unwrap().is_geographic());
        assert!(!Crs::from_epsg(31982).unwrap().is_geographic());
        assert!(!Crs::from_epsg(3857).unwrap().is_geographic());
    }

    #[test]
    fn utm_reference_points() {
        let (x, y) = transformer("EPSG:4326", "EPSG:32631").transform(3.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-3);

        let (_, y) = transformer("EPSG:4326", "EPSG:32631").transform(3.0, 45.0).unwrap();
        assert_abs_diff_eq!(y, 4_982_950.4, epsilon = 1.0);

        let (x, y) = transformer("EPSG:4674", "EPSG:31982").transform(-51.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 500_000.0, epsilon = 1e-2);
        assert_abs_diff_eq!(y, 10_000_000.0, epsilon = 1e-2);
    }

    #[test]
    fn lambert_93_origin() {
        let (x, y) = transformer("EPSG:4326", "EPSG:2154").transform(3.0, 46.5).unwrap();
        assert_abs_diff_eq!(x, 700_000.0, epsilon = 1e-2);
        assert_abs_diff_eq!(y, 6_600_000.0, epsilon = 1e-2);
    }

    #[test]
    fn utm_round_trip() {
        let fwd = transformer("EPSG:4674", "EPSG:31982");
        let inv = transformer("EPSG:31982", "EPSG:4674");
        for &(lon, lat) in &[(-51.0, -23.5), (-52.7, -10.1), (-49.4, -30.0), (-51.2, -0.5)] {
            let (x, y) = fwd.transform(lon, lat).unwrap();
            let (lon2, lat2) = inv.transform(x, y).unwrap();
            assert_abs_diff_eq!(lon, lon2, epsilon = 1e-7);
            assert_abs_diff_eq!(lat, lat2, epsilon = 1e-7);
        }
    }

    #[test]
    fn web_mercator_extent() {
        let (x, y) = transformer("EPSG:4326", "EPSG:3857").transform(180.0, 0.0).unwrap();
        assert_abs_diff_eq!(x, 20_037_508.342_789_244, epsilon = 1e-3);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn polygon_reprojection_keeps_rings() {
        let poly = Polygon::new(
            polygon![(x: -51.01, y: -23.51), (x: -50.99, y: -23.51), (x: -50.99, y: -23.49), (x: -51.01, y: -23.49)]
                .exterior()
                .clone(),
            vec![LineString::from(vec![(-51.0, -23.5), (-50.995, -23.5), (-50.995, -23.495), (-51.0, -23.5)])],
        );
        let out = ProjReprojector.reproject(&poly, "EPSG:4674", "EPSG:31982").unwrap();
        assert_eq!(out.exterior().0.len(), poly.exterior().0.len());
        assert_eq!(out.interiors().len(), 1);
        let first = out.exterior().0[0];
        assert!((400_000.0..600_000.0).contains(&first.x));
        assert!((7_000_000.0..8_000_000.0).contains(&first.y));
    }

    #[test]
    fn identical_or_unknown_crs_is_a_no_op() {
        let poly = polygon![(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0)];
        assert_eq!(ProjReprojector.reproject(&poly, "EPSG:99999", "epsg:99999").unwrap(), poly);
        assert_eq!(ProjReprojector.reproject(&poly, "", "EPSG:31982").unwrap(), poly);
        assert!(same_crs("EPSG:3857", "EPSG:900913"));
        assert!(!same_crs("EPSG:4326", "EPSG:4674"));
    }

    #[test]
    fn unknown_code_is_a_reprojection_error() {
        let poly = polygon![(x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0)];
        let err = ProjReprojector.reproject(&poly, "EPSG:99999", "EPSG:31982").unwrap_err();
        assert!(matches!(err, Error::Reprojection { .. }));
        assert!(err.to_string().contains("99999"));
    }
}
