//! Near-real-time change product: a detection-count band and a date band.

use std::sync::Arc;

use super::remap::{harmonize, nrt_class};
use super::{AlertData, AlertDriver, FetchRequest};
use crate::date::DateEncoding;
use crate::error::{AlertError, Result};
use crate::source::RasterSource;

pub struct Nrt {
    source: Arc<dyn RasterSource>,
}

impl Nrt {
    pub const ID: &'static str = "NRT";

    pub fn new(source: Arc<dyn RasterSource>) -> Self {
        Self { source }
    }
}

/// `date_encoding` parameter, defaulting to decimal years.
pub(crate) fn encoding_param(req: &FetchRequest<'_>, default: DateEncoding) -> Result<DateEncoding> {
    match req.params.get("date_encoding") {
        None => Ok(default),
        Some(name) => DateEncoding::from_name(name)
            .ok_or_else(|| AlertError::Config(format!("unknown date_encoding `{name}`"))),
    }
}

impl AlertDriver for Nrt {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        let asset = req
            .params
            .get("asset")
            .ok_or_else(|| AlertError::MissingAsset("NRT requires an `asset` parameter".into()))?;
        let encoding = encoding_param(req, DateEncoding::DecimalYear)?;
        let bounds = req.aoi_bounds()?;
        let counts = self.source.band(asset, req.params.get_or("alert_band", "count"), &bounds)?;
        let dates = self.source.band(asset, req.params.get_or("date_band", "date"), &bounds)?;
        let raster = harmonize(Self::ID, &counts, &dates, nrt_class, encoding, req)?;
        Ok(AlertData::Raster(raster))
    }
}
