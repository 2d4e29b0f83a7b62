//! User-provided alert rasters: an asset published on the imagery provider
//! (`GEE`) or a pair of local GeoTIFF files (`LOCAL`). Both carry canonical
//! classes already and date pixels as proleptic Gregorian ordinals.

use std::path::Path;
use std::sync::Arc;

use super::nrt::encoding_param;
use super::remap::{self, harmonize};
use super::{AlertData, AlertDriver, FetchRequest};
use crate::date::DateEncoding;
use crate::error::{AlertError, Result};
use crate::geotiff;
use crate::source::RasterSource;

pub struct GeeAsset {
    source: Arc<dyn RasterSource>,
}

impl GeeAsset {
    pub const ID: &'static str = "GEE";

    pub fn new(source: Arc<dyn RasterSource>) -> Self {
        Self { source }
    }
}

impl AlertDriver for GeeAsset {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let asset = req
            .params
            .get("asset")
            .ok_or_else(|| AlertError::MissingAsset("GEE requires an `asset` parameter".into()))?;
        if !self.source.has_asset(asset) {
            return Err(AlertError::MissingAsset(asset.to_string()));
        }
        let encoding = encoding_param(req, DateEncoding::ProlepticOrdinal)?;
        let bounds = req.aoi_bounds()?;
        let alert = self.source.band(asset, req.params.get_or("alert_band", "alert"), &bounds)?;
        let dates = self.source.band(asset, req.params.get_or("date_band", "date"), &bounds)?;
        let raster = harmonize(Self::ID, &alert, &dates, |v| remap::CANONICAL.class(v), encoding, req)?;
        Ok(AlertData::Raster(raster))
    }
}

#[derive(Default)]
pub struct LocalFiles;

impl LocalFiles {
    pub const ID: &'static str = "LOCAL";

    pub fn new() -> Self {
        Self
    }
}

impl AlertDriver for LocalFiles {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let alert_path = Path::new(req.params.require("alert_file")?);
        let date_path = Path::new(req.params.require("date_file")?);
        for p in [alert_path, date_path] {
            if !p.is_file() {
                return Err(AlertError::MissingAsset(p.display().to_string()));
            }
        }
        let encoding = encoding_param(req, DateEncoding::ProlepticOrdinal)?;
        let bounds = req.aoi_bounds()?;
        let outside = || AlertError::EmptyResult(format!("{} does not cover the area of interest", alert_path.display()));
        let alert = geotiff::read_band(alert_path)?.crop(&bounds).ok_or_else(outside)?;
        let dates = geotiff::read_band(date_path)?.crop(&bounds).ok_or_else(outside)?;
        let raster = harmonize(Self::ID, &alert, &dates, |v| remap::CANONICAL.class(v), encoding, req)?;
        Ok(AlertData::Raster(raster))
    }
}
