//! Minimal GeoTIFF support: 8-bit orthophoto in, 8-bit class raster out.
//!
//! Orthophotos are read lazily. Only the strips or tiles a window overlaps
//! are decoded, and recently used chunks are kept in a byte-bounded cache.
//!
//! Georeferencing is read from `ModelTransformationTag`, or from
//! `ModelPixelScaleTag` + `ModelTiepointTag`; the CRS comes from the
//! projected / geographic EPSG code in the GeoKey directory.
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use ndarray::Array2;
use orthoseg_core::{Affine, Crs, Error, PixelWindow, RasterSource};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::{debug, warn};

// ── GeoKeys ─────────────────────────────────────────────────────────────────

const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const GEOGRAPHIC_TYPE: u16 = 2048;
const PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const RASTER_PIXEL_IS_POINT: u16 = 2;
/// GeoKey value meaning "user defined", i.e. no EPSG code.
const USER_DEFINED: u16 = 32767;

/// Decoded chunks kept per open orthophoto.
pub const CHUNK_CACHE_BYTES: usize = 256 << 20;

// ── Reading ─────────────────────────────────────────────────────────────────

pub fn open_orthophoto(path: &Path) -> Result<GeoTiffRaster<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    GeoTiffRaster::new(BufReader::new(file)).with_context(|| format!("Cannot decode {}", path.display()))
}

/// Window-readable 8-bit GeoTIFF, pixel-interleaved, striped or tiled.
pub struct GeoTiffRaster<R: Read + Seek> {
    width: usize,
    height: usize,
    bands: usize,
    /// Nominal chunk size `(width, height)`; edge chunks may be smaller.
    chunk: (usize, usize),
    chunks_across: usize,
    transform: Affine,
    crs: String,
    reader: Mutex<ChunkReader<R>>,
}

struct ChunkReader<R: Read + Seek> {
    decoder: Decoder<R>,
    cache: HashMap<u32, Vec<u8>>,
    order: VecDeque<u32>,
    cached_bytes: usize,
    budget: usize,
}

impl<R: Read + Seek> ChunkReader<R> {
    fn chunk(&mut self, index: u32) -> Result<&[u8]> {
        if !self.cache.contains_key(&index) {
            let samples = match self.decoder.read_chunk(index)? {
                DecodingResult::U8(v) => v,
                _ => bail!("unexpected sample type in chunk {index} (expected U8)"),
            };
            self.cached_bytes += samples.len();
            self.cache.insert(index, samples);
            self.order.push_back(index);
            while self.cached_bytes > self.budget && self.order.len() > 1 {
                if let Some(old) = self.order.pop_front() {
                    if let Some(v) = self.cache.remove(&old) {
                        self.cached_bytes -= v.len();
                    }
                }
            }
        }
        self.cache.get(&index).map(Vec::as_slice).context("chunk evicted while in use")
    }
}

impl<R: Read + Seek> GeoTiffRaster<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_cache_budget(reader, CHUNK_CACHE_BYTES)
    }

    pub fn with_cache_budget(reader: R, budget: usize) -> Result<Self> {
        let mut decoder = Decoder::new(reader)?.with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions()?;
        let bands = match decoder.colortype()? {
            ColorType::Gray(8) => 1,
            ColorType::GrayA(8) => 2,
            ColorType::RGB(8) => 3,
            ColorType::RGBA(8) => 4,
            other => bail!("unsupported pixel layout {other:?} (expected 8-bit gray or RGB)"),
        };
        if let Some(planar) = decoder.find_tag(Tag::PlanarConfiguration)? {
            if planar.into_u16()? != 1 {
                bail!("band-separate (planar) TIFFs are not supported");
            }
        }

        let geokeys = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
            Some(v) => v.into_u16_vec()?,
            None => {
                warn!("no GeoKey directory, CRS unknown");
                Vec::new()
            }
        };
        let mut transform = read_transform(&mut decoder)?;
        if geokey(&geokeys, GT_RASTER_TYPE) == Some(RASTER_PIXEL_IS_POINT) {
            transform = point_to_area(transform);
        }
        let crs = crs_from_geokeys(&geokeys).unwrap_or_default();

        let (cw, ch) = decoder.chunk_dimensions();
        let chunk = (cw as usize, ch as usize);
        if chunk.0 == 0 || chunk.1 == 0 {
            bail!("degenerate {}x{} chunk layout", chunk.0, chunk.1);
        }
        let (width, height) = (width as usize, height as usize);
        debug!(width, height, bands, chunk_width = chunk.0, chunk_height = chunk.1, crs = %crs, "orthophoto header");

        Ok(Self {
            width,
            height,
            bands,
            chunk,
            chunks_across: width.div_ceil(chunk.0),
            transform,
            crs,
            reader: Mutex::new(ChunkReader {
                decoder,
                cache: HashMap::new(),
                order: VecDeque::new(),
                cached_bytes: 0,
                budget,
            }),
        })
    }

    fn read_band(&self, band: usize, window: &PixelWindow) -> Result<Array2<u8>> {
        let (row0, col0) = (window.row_off as usize, window.col_off as usize);
        let (row1, col1) = (row0 + window.height, col0 + window.width);
        let (cw, ch) = self.chunk;
        let mut out = Array2::<u8>::zeros((window.height, window.width));
        let mut reader = self.reader.lock().map_err(|_| anyhow::anyhow!("chunk reader poisoned"))?;

        for chunk_row in row0 / ch..=(row1 - 1) / ch {
            for chunk_col in col0 / cw..=(col1 - 1) / cw {
                let index = u32::try_from(chunk_row * self.chunks_across + chunk_col)?;
                // Chunk origin and its unpadded extent.
                let (top, left) = (chunk_row * ch, chunk_col * cw);
                let data_w = cw.min(self.width - left);
                let data_h = ch.min(self.height - top);
                let samples = reader.chunk(index)?;
                let stride = if samples.len() >= cw * ch * self.bands { cw } else { data_w };
                if samples.len() < stride * data_h * self.bands {
                    bail!("chunk {index} holds {} samples, expected {}", samples.len(), stride * data_h * self.bands);
                }

                for r in row0.max(top)..row1.min(top + data_h) {
                    let base = (r - top) * stride;
                    for c in col0.max(left)..col1.min(left + data_w) {
                        out[[r - row0, c - col0]] = samples[(base + c - left) * self.bands + band];
                    }
                }
            }
        }
        Ok(out)
    }
}

impl<R: Read + Seek> RasterSource for GeoTiffRaster<R> {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn band_count(&self) -> usize {
        self.bands
    }

    fn transform(&self) -> Affine {
        self.transform
    }

    fn crs(&self) -> &str {
        &self.crs
    }

    fn read_window(&self, band: usize, window: &PixelWindow) -> orthoseg_core::Result<Array2<u8>> {
        let inside = window.intersect_raster(self.width, self.height);
        if band >= self.bands || inside != Some(*window) {
            return Err(Error::RasterRead(
                format!("band {band} window {window:?} outside {}x{} raster", self.width, self.height).into(),
            ));
        }
        self.read_band(band, window).map_err(|e| Error::RasterRead(format!("{e:#}").into()))
    }
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Affine> {
    if let Some(value) = decoder.find_tag(Tag::ModelTransformationTag)? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(Affine::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }
        warn!(len = m.len(), "ignoring short ModelTransformationTag");
    }

    let scale = decoder.find_tag(Tag::ModelPixelScaleTag)?.map(|v| v.into_f64_vec()).transpose()?;
    let tie = decoder.find_tag(Tag::ModelTiepointTag)?.map(|v| v.into_f64_vec()).transpose()?;
    match (scale, tie) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (i, j, x, y) = (t[0], t[1], t[3], t[4]);
            Ok(Affine::new(s[0], 0.0, x - i * s[0], 0.0, -s[1], y + j * s[1]))
        }
        _ => {
            warn!("no georeferencing tags, using the pixel grid as map coordinates");
            Ok(Affine::identity())
        }
    }
}

/// PixelIsPoint rasters tie map coordinates to pixel centres; move the
/// origin back to the upper-left pixel corner.
fn point_to_area(t: Affine) -> Affine {
    Affine::new(t.a, t.b, t.c - 0.5 * (t.a + t.b), t.d, t.e, t.f - 0.5 * (t.d + t.e))
}

/// Inline (`TIFFTagLocation == 0`) value of GeoKey `id`.
fn geokey(keys: &[u16], id: u16) -> Option<u16> {
    keys.get(4..)?.chunks_exact(4).find(|e| e[0] == id && e[1] == 0).map(|e| e[3])
}

/// `EPSG:n` from a GeoKey directory, preferring the projected CS key.
pub fn crs_from_geokeys(keys: &[u16]) -> Option<String> {
    let code = |id| geokey(keys, id).filter(|&v| v != 0 && v != USER_DEFINED);
    code(PROJECTED_CS_TYPE)
        .or_else(|| code(GEOGRAPHIC_TYPE))
        .map(|code| format!("EPSG:{code}"))
}

/// GeoKey directory declaring `crs`, or `None` when it has no EPSG code.
pub fn geokeys_for(crs: &str) -> Option<Vec<u16>> {
    let code: u16 = crs.trim().rsplit(':').next()?.trim().parse().ok()?;
    let geographic = Crs::from_epsg(code.into()).is_some_and(Crs::is_geographic);
    let (model, key) = if geographic {
        (MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE)
    };
    Some(vec![
        1, 1, 0, 3, // version, revision, minor, key count
        GT_MODEL_TYPE, 0, 1, model,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, code,
    ])
}

// ── Writing ─────────────────────────────────────────────────────────────────

/// Write a single-band class raster (LZW) georeferenced by `transform`.
pub fn write_classification(path: &Path, labels: &Array2<u8>, transform: &Affine, crs: &str) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Cannot create {}", path.display()))?;
    encode_classification(BufWriter::new(file), labels, transform, crs)
        .with_context(|| format!("Cannot write {}", path.display()))
}

pub fn encode_classification<W: Write + Seek>(
    writer: W,
    labels: &Array2<u8>,
    transform: &Affine,
    crs: &str,
) -> Result<()> {
    let (height, width) = labels.dim();
    let data: Vec<u8> = labels.iter().copied().collect();

    let mut encoder = TiffEncoder::new(writer)?;
    let mut image =
        encoder.new_image_with_compression::<colortype::Gray8, _>(width as u32, height as u32, Lzw)?;

    let t = transform;
    if t.b == 0.0 && t.d == 0.0 {
        image.encoder().write_tag(Tag::ModelPixelScaleTag, &[t.a, -t.e, 0.0][..])?;
        image.encoder().write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, t.c, t.f, 0.0][..])?;
    } else {
        let m = [
            t.a, t.b, 0.0, t.c, //
            t.d, t.e, 0.0, t.f, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        image.encoder().write_tag(Tag::ModelTransformationTag, &m[..])?;
    }
    if let Some(keys) = geokeys_for(crs) {
        image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    }
    image.write_data(&data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample(r: usize, c: usize, b: usize) -> u8 {
        ((r * 7 + c * 3 + b * 50) % 251) as u8
    }

    /// 23×13 RGB orthophoto stored in 4-row strips.
    fn striped_rgb(keys: Option<&[u16]>) -> Cursor<Vec<u8>> {
        let (w, h) = (23usize, 13usize);
        let mut data = Vec::with_capacity(w * h * 3);
        for r in 0..h {
            for c in 0..w {
                data.extend((0..3).map(|b| sample(r, c, b)));
            }
        }
        let mut buf = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut buf).unwrap();
            let mut image = encoder.new_image::<colortype::RGB8>(w as u32, h as u32).unwrap();
            image.rows_per_strip(4).unwrap();
            image.encoder().write_tag(Tag::ModelPixelScaleTag, &[2.0, 2.0, 0.0][..]).unwrap();
            image
                .encoder()
                .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, 100.0, 500.0, 0.0][..])
                .unwrap();
            if let Some(keys) = keys {
                image.encoder().write_tag(Tag::GeoKeyDirectoryTag, keys).unwrap();
            }
            image.write_data(&data).unwrap();
        }
        buf.set_position(0);
        buf
    }

    fn assert_window(raster: &impl RasterSource, window: PixelWindow) {
        for band in 0..3 {
            let got = raster.read_window(band, &window).unwrap();
            assert_eq!(got.dim(), (window.height, window.width));
            for ((r, c), &v) in got.indexed_iter() {
                assert_eq!(v, sample(r + window.row_off as usize, c + window.col_off as usize, band));
            }
        }
    }

    #[test]
    fn geokeys_round_trip() {
        let keys = geokeys_for("EPSG:31982").unwrap();
        assert_eq!(crs_from_geokeys(&keys).as_deref(), Some("EPSG:31982"));
        let keys = geokeys_for("EPSG:4674").unwrap();
        assert_eq!(keys[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(crs_from_geokeys(&keys).as_deref(), Some("EPSG:4674"));
        assert!(geokeys_for("").is_none());
    }

    #[test]
    fn user_defined_crs_is_unknown() {
        let keys = [1, 1, 0, 1, PROJECTED_CS_TYPE, 0, 1, USER_DEFINED];
        assert_eq!(crs_from_geokeys(&keys), None);
    }

    #[test]
    fn windows_spanning_strips_match_the_source() {
        let raster = GeoTiffRaster::new(striped_rgb(None)).unwrap();
        assert_eq!((raster.width(), raster.height(), raster.band_count()), (23, 13, 3));
        assert_window(&raster, PixelWindow::new(0, 0, 23, 13));
        assert_window(&raster, PixelWindow::new(5, 3, 10, 6));
        assert_window(&raster, PixelWindow::new(20, 12, 3, 1));
    }

    #[test]
    fn tiny_cache_still_reads_correctly() {
        let raster = GeoTiffRaster::with_cache_budget(striped_rgb(None), 1).unwrap();
        assert_window(&raster, PixelWindow::new(2, 1, 19, 11));
        assert_window(&raster, PixelWindow::new(0, 8, 7, 5));
    }

    #[test]
    fn out_of_bounds_window_is_a_read_error() {
        let raster = GeoTiffRaster::new(striped_rgb(None)).unwrap();
        let err = raster.read_window(0, &PixelWindow::new(20, 0, 5, 2)).unwrap_err();
        assert!(matches!(err, Error::RasterRead(_)));
        assert!(raster.read_window(3, &PixelWindow::new(0, 0, 2, 2)).is_err());
    }

    #[test]
    fn pixel_is_point_moves_origin_to_the_corner() {
        let area = GeoTiffRaster::new(striped_rgb(None)).unwrap();
        assert_eq!(area.transform(), Affine::new(2.0, 0.0, 100.0, 0.0, -2.0, 500.0));

        let keys: [u16; 12] = [1, 1, 0, 2, GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_POINT, PROJECTED_CS_TYPE, 0, 1, 31982];
        let point = GeoTiffRaster::new(striped_rgb(Some(&keys[..]))).unwrap();
        assert_eq!(point.transform(), Affine::new(2.0, 0.0, 99.0, 0.0, -2.0, 501.0));
        assert_eq!(point.crs(), "EPSG:31982");
    }

    #[test]
    fn classification_reads_back_as_georeferenced_raster() {
        let labels = Array2::from_shape_fn((5, 7), |(r, c)| ((r + c) % 3) as u8);
        let t = Affine::north_up(620_000.0, 7_400_000.0, 0.05, -0.05);
        let mut buf = Cursor::new(Vec::new());
        encode_classification(&mut buf, &labels, &t, "EPSG:31982").unwrap();

        buf.set_position(0);
        let raster = GeoTiffRaster::new(buf).unwrap();
        assert_eq!((raster.width(), raster.height(), raster.band_count()), (7, 5, 1));
        assert_eq!(raster.crs(), "EPSG:31982");
        assert_eq!(raster.transform(), t);
        assert_eq!(raster.read_window(0, &PixelWindow::new(0, 0, 7, 5)).unwrap(), labels);
    }

    #[test]
    fn rotated_transform_uses_transformation_tag() {
        let labels = Array2::<u8>::ones((2, 2));
        let t = Affine::new(1.0, 0.5, 10.0, 0.25, -1.0, 20.0);
        let mut buf = Cursor::new(Vec::new());
        encode_classification(&mut buf, &labels, &t, "").unwrap();
        buf.set_position(0);
        let raster = GeoTiffRaster::new(buf).unwrap();
        assert_eq!(raster.transform(), t);
        assert_eq!(raster.crs(), "");
    }
}
