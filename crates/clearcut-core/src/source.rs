//! Injected data sources.
//!
//! Drivers never reach for a global imagery session. They receive a
//! [`RasterSource`] (band rasters by asset path) and, for vector products, a
//! [`VectorSource`] (feature collections by dataset name).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use geojson::{FeatureCollection, GeoJson};

use crate::error::{AlertError, Result};
use crate::geometry::BBox;
use crate::geotiff;
use crate::grid::Grid;

/// Read access to band rasters, addressed as `asset` + `band`.
pub trait RasterSource: Send + Sync {
    /// Band values restricted to the pixels overlapping `bounds`.
    fn band(&self, asset: &str, band: &str, bounds: &BBox) -> Result<Grid<f64>>;

    fn has_asset(&self, asset: &str) -> bool;
}

/// Read access to vector alert products.
pub trait VectorSource: Send + Sync {
    fn features(&self, dataset: &str) -> Result<FeatureCollection>;
}

fn crop_or_empty(grid: &Grid<f64>, asset: &str, bounds: &BBox) -> Result<Grid<f64>> {
    grid.crop(bounds)
        .ok_or_else(|| AlertError::EmptyResult(format!("{asset} does not cover the area of interest")))
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Bands held in memory, keyed by `(asset, band)`.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    bands: HashMap<(String, String), Grid<f64>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: &str, band: &str, grid: Grid<f64>) -> &mut Self {
        self.bands.insert((asset.to_string(), band.to_string()), grid);
        self
    }

    pub fn with_band(mut self, asset: &str, band: &str, grid: Grid<f64>) -> Self {
        self.insert(asset, band, grid);
        self
    }
}

impl RasterSource for MemorySource {
    fn band(&self, asset: &str, band: &str, bounds: &BBox) -> Result<Grid<f64>> {
        let grid = self
            .bands
            .get(&(asset.to_string(), band.to_string()))
            .ok_or_else(|| AlertError::MissingAsset(format!("{asset}:{band}")))?;
        crop_or_empty(grid, asset, bounds)
    }

    fn has_asset(&self, asset: &str) -> bool {
        self.bands.keys().any(|(a, _)| a == asset)
    }
}

// ── GeoTIFF directory ───────────────────────────────────────────────────────

/// Bands stored as `<root>/<asset>/<band>.tif`.
#[derive(Debug, Clone)]
pub struct GeoTiffSource {
    root: PathBuf,
}

impl GeoTiffSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn band_path(&self, asset: &str, band: &str) -> PathBuf {
        self.root.join(asset).join(format!("{band}.tif"))
    }
}

impl RasterSource for GeoTiffSource {
    fn band(&self, asset: &str, band: &str, bounds: &BBox) -> Result<Grid<f64>> {
        let path = self.band_path(asset, band);
        if !path.is_file() {
            return Err(AlertError::MissingAsset(path.display().to_string()));
        }
        let grid = geotiff::read_band(&path)?;
        crop_or_empty(&grid, asset, bounds)
    }

    fn has_asset(&self, asset: &str) -> bool {
        self.root.join(asset).is_dir()
    }
}

// ── Vector sources ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct MemoryVectorSource {
    datasets: HashMap<String, FeatureCollection>,
}

impl MemoryVectorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dataset(mut self, name: &str, features: FeatureCollection) -> Self {
        self.datasets.insert(name.to_string(), features);
        self
    }
}

impl VectorSource for MemoryVectorSource {
    fn features(&self, dataset: &str) -> Result<FeatureCollection> {
        self.datasets
            .get(dataset)
            .cloned()
            .ok_or_else(|| AlertError::MissingAsset(dataset.to_string()))
    }
}

/// Datasets stored as `<root>/<dataset>.geojson`.
#[derive(Debug, Clone)]
pub struct GeoJsonDirSource {
    root: PathBuf,
}

impl GeoJsonDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VectorSource for GeoJsonDirSource {
    fn features(&self, dataset: &str) -> Result<FeatureCollection> {
        read_feature_collection(&self.root.join(format!("{dataset}.geojson")))
    }
}

/// Read a GeoJSON file as a feature collection. A bare feature or geometry
/// becomes a one-element collection.
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection> {
    if !path.is_file() {
        return Err(AlertError::MissingAsset(path.display().to_string()));
    }
    let text = fs::read_to_string(path)?;
    let doc: GeoJson = text.parse()?;
    Ok(match doc {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(f) => FeatureCollection {
            bbox: None,
            features: vec![f],
            foreign_members: None,
        },
        GeoJson::Geometry(g) => FeatureCollection {
            bbox: None,
            features: vec![geojson::Feature::from(g)],
            foreign_members: None,
        },
    })
}
