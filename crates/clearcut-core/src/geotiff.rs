//! Single-band GeoTIFF reading and LZW writing.
//!
//! Georeferencing uses the ModelPixelScale (33550) and ModelTiepoint (33922)
//! tags with the tie point on the north-west corner, EPSG:4326.
//! TIFF storage order: row 0 = northernmost (N→S).
//! Grid storage order: row 0 = min_lat (S→N).
//! Row reversal is applied on both read and write.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, compression::Lzw, TiffEncoder};
use tiff::tags::Tag;
use tracing::debug;

use crate::error::{AlertError, Result};
use crate::geometry::BBox;
use crate::grid::Grid;

/// GeoKeyDirectory for a geographic (lat/lon, WGS84) raster, pixel-is-area.
const GEO_KEYS_WGS84: [u16; 16] = [1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326];

/// Pixel type a band is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
}

impl SampleType {
    /// Smallest unsigned type holding every value of `grid`.
    pub fn minimal_for(grid: &Grid<f64>) -> Self {
        let max = grid.data.iter().copied().filter(|v| v.is_finite()).fold(0.0f64, f64::max);
        if max <= u8::MAX as f64 {
            SampleType::U8
        } else {
            SampleType::U16
        }
    }
}

/// Read the first band of a GeoTIFF as `f64`, rows flipped to S→N.
pub fn read_band(path: &Path) -> Result<Grid<f64>> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?
        .filter(|s| s.len() >= 2)
        .ok_or_else(|| AlertError::MissingInput(format!("{}: no ModelPixelScale tag", path.display())))?;
    let tie = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .map(|v| v.into_f64_vec())
        .transpose()?
        .filter(|t| t.len() >= 6)
        .ok_or_else(|| AlertError::MissingInput(format!("{}: no ModelTiepoint tag", path.display())))?;

    let samples: Vec<f64> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(AlertError::MissingInput(format!(
                "{}: unsupported sample format",
                path.display()
            )))
        }
    };
    if samples.len() < width * height {
        return Err(AlertError::MissingInput(format!(
            "{}: expected a single band of {width}×{height}",
            path.display()
        )));
    }
    let bands = samples.len() / (width * height);

    let min_lon = tie[3];
    let max_lat = tie[4];
    let bounds = BBox::new(
        min_lon,
        max_lat - height as f64 * scale[1],
        min_lon + width as f64 * scale[0],
        max_lat,
    );
    let mut grid = Grid::new(width, height, bounds, 0.0);
    for tiff_row in 0..height {
        let row = height - 1 - tiff_row;
        for col in 0..width {
            grid.set(row, col, samples[(tiff_row * width + col) * bands]);
        }
    }
    debug!(path = %path.display(), width, height, "read GeoTIFF band");
    Ok(grid)
}

/// Write `grid` as an LZW-compressed single-band GeoTIFF.
/// Non-finite values are written as 0 (no data).
pub fn write_band(path: &Path, grid: &Grid<f64>, sample: SampleType) -> Result<()> {
    let file = File::create(path)?;
    let mut tiff = TiffEncoder::new(BufWriter::new(file))?;
    let (width, height) = (grid.width as u32, grid.height as u32);
    let (dx, dy) = grid.pixel_size();
    let scale = [dx, dy, 0.0];
    let tie = [0.0, 0.0, 0.0, grid.min_lon, grid.max_lat, 0.0];

    // TIFF rows run north to south.
    let flipped = (0..grid.height).rev().flat_map(|r| (0..grid.width).map(move |c| (r, c)));
    match sample {
        SampleType::U8 => {
            let data: Vec<u8> = flipped.map(|(r, c)| to_sample(grid.get(r, c), u8::MAX as f64) as u8).collect();
            let mut image = tiff.new_image_with_compression::<colortype::Gray8, _>(width, height, Lzw::default())?;
            image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
            image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
            image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &GEO_KEYS_WGS84[..])?;
            image.write_data(&data)?;
        }
        SampleType::U16 => {
            let data: Vec<u16> =
                flipped.map(|(r, c)| to_sample(grid.get(r, c), u16::MAX as f64) as u16).collect();
            let mut image = tiff.new_image_with_compression::<colortype::Gray16, _>(width, height, Lzw::default())?;
            image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
            image.encoder().write_tag(Tag::ModelTiepointTag, &tie[..])?;
            image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &GEO_KEYS_WGS84[..])?;
            image.write_data(&data)?;
        }
    }
    debug!(path = %path.display(), width, height, ?sample, "wrote LZW GeoTIFF");
    Ok(())
}

fn to_sample(v: f64, max: f64) -> f64 {
    if v.is_finite() {
        v.round().clamp(0.0, max)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_grid() -> Grid<f64> {
        let mut g = Grid::new(3, 2, BBox::new(10.0, -1.0, 10.3, -0.8), 0.0);
        g.set(0, 0, 1.0);
        g.set(1, 2, 2.0);
        g
    }

    /// ✓ Write then read preserves orientation and georeferencing.
    #[test]
    fn write_then_read_preserves_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alert.tif");
        let g = sample_grid();
        write_band(&path, &g, SampleType::U8).unwrap();
        let back = read_band(&path).unwrap();
        assert_eq!((back.width, back.height), (3, 2));
        assert_eq!(back.get(0, 0), 1.0, "south-west pixel");
        assert_eq!(back.get(1, 2), 2.0, "north-east pixel");
        assert!((back.min_lat - -1.0).abs() < 1e-9 && (back.max_lon - 10.3).abs() < 1e-9);
    }

    #[test]
    fn u16_band_keeps_yyddd_dates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("date.tif");
        let mut g = sample_grid();
        g.set(0, 1, 21_205.0);
        g.set(1, 1, f64::NAN);
        assert_eq!(SampleType::minimal_for(&g), SampleType::U16);
        write_band(&path, &g, SampleType::U16).unwrap();
        let back = read_band(&path).unwrap();
        assert_eq!(back.get(0, 1), 21_205.0);
        assert_eq!(back.get(1, 1), 0.0, "NaN is written as no data");
    }

    #[test]
    fn minimal_type_for_classes_is_u8() {
        assert_eq!(SampleType::minimal_for(&sample_grid()), SampleType::U8);
    }
}
