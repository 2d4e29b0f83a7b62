//! CUSUM break detection: a break-confidence band and a break-date band.
//! The confirmed/potential `offset` has no default and must be supplied.

use std::sync::Arc;

use super::nrt::encoding_param;
use super::remap::{cusum_class, harmonize};
use super::{AlertData, AlertDriver, FetchRequest};
use crate::date::DateEncoding;
use crate::error::{AlertError, Result};
use crate::source::RasterSource;

pub struct Cusum {
    source: Arc<dyn RasterSource>,
}

impl Cusum {
    pub const ID: &'static str = "CUSUM";

    pub fn new(source: Arc<dyn RasterSource>) -> Self {
        Self { source }
    }
}

impl AlertDriver for Cusum {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let asset = req
            .params
            .get("asset")
            .ok_or_else(|| AlertError::MissingAsset("CUSUM requires an `asset` parameter".into()))?;
        let offset = req.params.require_f64("offset")?;
        if !(offset > 0.0 && offset <= 1.0) {
            return Err(AlertError::Config(format!("CUSUM offset must be in (0, 1], got {offset}")));
        }
        let encoding = encoding_param(req, DateEncoding::DecimalYear)?;
        let bounds = req.aoi_bounds()?;
        let confidence = self.source.band(asset, req.params.get_or("alert_band", "confidence"), &bounds)?;
        let dates = self.source.band(asset, req.params.get_or("date_band", "date"), &bounds)?;
        let raster = harmonize(Self::ID, &confidence, &dates, |v| cusum_class(v, offset), encoding, req)?;
        Ok(AlertData::Raster(raster))
    }
}
