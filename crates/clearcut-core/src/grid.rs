use serde::{Deserialize, Serialize};

use crate::geometry::{covers, BBox, Coord, MultiPolygon};

/// Relative pixel-size mismatch under which two grids count as aligned.
pub const ALIGN_TOLERANCE: f64 = 0.01;

/// A georeferenced 2D grid in geographic coordinates, row-major.
/// Row 0 is the southern edge (`min_lat`), column 0 the western edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

/// Footprint accessors, available for any cell type.
impl<T> Grid<T> {
    pub fn bounds(&self) -> BBox {
        BBox::new(self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }

    /// Pixel size in degrees, `(d_lon, d_lat)`.
    pub fn pixel_size(&self) -> (f64, f64) {
        (
            (self.max_lon - self.min_lon) / self.width as f64,
            (self.max_lat - self.min_lat) / self.height as f64,
        )
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> Coord {
        let (dx, dy) = self.pixel_size();
        Coord { x: self.min_lon + (col as f64 + 0.5) * dx, y: self.min_lat + (row as f64 + 0.5) * dy }
    }

    /// `(row, col)` of the pixel holding `(lon, lat)`; west/south edges inclusive.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        if lon < self.min_lon || lon >= self.max_lon || lat < self.min_lat || lat >= self.max_lat {
            return None;
        }
        let (dx, dy) = self.pixel_size();
        let col = (((lon - self.min_lon) / dx) as usize).min(self.width - 1);
        let row = (((lat - self.min_lat) / dy) as usize).min(self.height - 1);
        Some((row, col))
    }

    /// Same size and bounds within [`ALIGN_TOLERANCE`] of a pixel.
    pub fn aligned_with<U>(&self, other: &Grid<U>) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let (dx, dy) = self.pixel_size();
        let tol_x = dx * ALIGN_TOLERANCE;
        let tol_y = dy * ALIGN_TOLERANCE;
        (self.min_lon - other.min_lon).abs() <= tol_x
            && (self.max_lon - other.max_lon).abs() <= tol_x
            && (self.min_lat - other.min_lat).abs() <= tol_y
            && (self.max_lat - other.max_lat).abs() <= tol_y
    }
}

impl<T: Copy> Grid<T> {
    /// Create a new grid covering `bounds`, filled with the given value.
    pub fn new(width: usize, height: usize, bounds: BBox, fill: T) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            min_lon: bounds.min_x,
            max_lon: bounds.max_x,
            min_lat: bounds.min_y,
            max_lat: bounds.max_y,
        }
    }

    /// Grid of pixels of `pixel` degrees `(d_lon, d_lat)` starting at the
    /// south-west corner of `bounds`, extended east/north to whole pixels.
    pub fn covering(bounds: &BBox, pixel: (f64, f64), fill: T) -> Self {
        let width = ((bounds.width() / pixel.0) - 1e-9).ceil().max(1.0) as usize;
        let height = ((bounds.height() / pixel.1) - 1e-9).ceil().max(1.0) as usize;
        let snapped = BBox::new(
            bounds.min_x,
            bounds.min_y,
            bounds.min_x + width as f64 * pixel.0,
            bounds.min_y + height as f64 * pixel.1,
        );
        Self::new(width, height, snapped, fill)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    /// Nearest-neighbour sample at `(lon, lat)`.
    pub fn sample(&self, lon: f64, lat: f64) -> Option<T> {
        self.locate(lon, lat).map(|(r, c)| self.get(r, c))
    }

    /// Pixel-aligned crop to the pixels overlapping `bbox`.
    /// The result covers whole source pixels, so its footprint changes.
    pub fn crop(&self, bbox: &BBox) -> Option<Grid<T>> {
        let (dx, dy) = self.pixel_size();
        let c0 = ((bbox.min_x - self.min_lon) / dx + 1e-9).floor().max(0.0) as usize;
        let r0 = ((bbox.min_y - self.min_lat) / dy + 1e-9).floor().max(0.0) as usize;
        let c1 = (((bbox.max_x - self.min_lon) / dx - 1e-9).ceil().max(0.0) as usize).min(self.width);
        let r1 = (((bbox.max_y - self.min_lat) / dy - 1e-9).ceil().max(0.0) as usize).min(self.height);
        if c0 >= c1 || r0 >= r1 {
            return None;
        }
        let width = c1 - c0;
        let height = r1 - r0;
        let mut data = Vec::with_capacity(width * height);
        for r in r0..r1 {
            let start = r * self.width;
            data.extend_from_slice(&self.data[start + c0..start + c1]);
        }
        Some(Grid {
            data,
            width,
            height,
            min_lon: self.min_lon + c0 as f64 * dx,
            max_lon: self.min_lon + c1 as f64 * dx,
            min_lat: self.min_lat + r0 as f64 * dy,
            max_lat: self.min_lat + r1 as f64 * dy,
        })
    }

    /// Nearest-neighbour resample onto `template`'s footprint; pixels with no
    /// source coverage take `fill`.
    pub fn resample_like<U>(&self, template: &Grid<U>, fill: T) -> Grid<T> {
        let mut out = Grid::new(template.width, template.height, template.bounds(), fill);
        for r in 0..out.height {
            for c in 0..out.width {
                let p = out.pixel_center(r, c);
                if let Some(v) = self.sample(p.x, p.y) {
                    out.set(r, c, v);
                }
            }
        }
        out
    }

    pub fn map<U: Copy>(&self, f: impl Fn(T) -> U) -> Grid<U> {
        Grid {
            data: self.data.iter().map(|&v| f(v)).collect(),
            width: self.width,
            height: self.height,
            min_lon: self.min_lon,
            max_lon: self.max_lon,
            min_lat: self.min_lat,
            max_lat: self.max_lat,
        }
    }
}

// ── Alert raster ─────────────────────────────────────────────────────────────

/// Canonical two-band alert raster.
///
/// `alert` is 0 (masked / no alert), 1 (confirmed) or 2 (potential).
/// `date` is `YYYY.DDD` where `alert != 0` and NaN everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRaster {
    pub alert: Grid<u8>,
    pub date: Grid<f64>,
}

impl AlertRaster {
    /// Fully masked raster over `bounds`.
    pub fn masked(width: usize, height: usize, bounds: BBox) -> Self {
        Self {
            alert: Grid::new(width, height, bounds, 0),
            date: Grid::new(width, height, bounds, f64::NAN),
        }
    }

    /// Fully masked raster sharing `template`'s footprint.
    pub fn masked_like<T>(template: &Grid<T>) -> Self {
        Self::masked(template.width, template.height, template.bounds())
    }

    pub fn width(&self) -> usize {
        self.alert.width
    }

    pub fn height(&self) -> usize {
        self.alert.height
    }

    pub fn bounds(&self) -> BBox {
        self.alert.bounds()
    }

    /// Write one pixel. Class 0 masks both bands.
    pub fn set(&mut self, row: usize, col: usize, class: u8, date: f64) {
        if class == 0 || !date.is_finite() {
            self.mask(row, col);
        } else {
            self.alert.set(row, col, class);
            self.date.set(row, col, date);
        }
    }

    pub fn mask(&mut self, row: usize, col: usize) {
        self.alert.set(row, col, 0);
        self.date.set(row, col, f64::NAN);
    }

    #[inline]
    pub fn is_masked(&self, row: usize, col: usize) -> bool {
        self.alert.get(row, col) == 0
    }

    pub fn alert_pixels(&self) -> usize {
        self.alert.data.iter().filter(|&&v| v != 0).count()
    }

    /// Crop both bands to `bbox`, see [`Grid::crop`].
    pub fn crop(&self, bbox: &BBox) -> Option<AlertRaster> {
        Some(AlertRaster {
            alert: self.alert.crop(bbox)?,
            date: self.date.crop(bbox)?,
        })
    }

    /// Nearest-neighbour resample onto `template`'s footprint.
    pub fn resample_like<T>(&self, template: &Grid<T>) -> AlertRaster {
        AlertRaster {
            alert: self.alert.resample_like(template, 0),
            date: self.date.resample_like(template, f64::NAN),
        }
    }

    /// Mask every pixel whose centre lies outside `area`.
    pub fn mask_outside(&mut self, area: &MultiPolygon) {
        for r in 0..self.height() {
            for c in 0..self.width() {
                if !self.is_masked(r, c) && !covers(area, self.alert.pixel_center(r, c)) {
                    self.mask(r, c);
                }
            }
        }
    }

    /// Pixel-wise mosaic, later layers win wherever they are unmasked.
    /// The first layer defines the footprint; misaligned layers are
    /// resampled onto it.
    pub fn mosaic(layers: impl IntoIterator<Item = AlertRaster>) -> Option<AlertRaster> {
        let mut layers = layers.into_iter();
        let mut base = layers.next()?;
        for layer in layers {
            let layer = if layer.alert.aligned_with(&base.alert) {
                layer
            } else {
                layer.resample_like(&base.alert)
            };
            for i in 0..base.alert.data.len() {
                if layer.alert.data[i] != 0 {
                    base.alert.data[i] = layer.alert.data[i];
                    base.date.data[i] = layer.date.data[i];
                }
            }
        }
        Some(base)
    }
}
