//! RADD radar alerts: `Alert` confidence band and `Date` as `YYDDD`.

use std::sync::Arc;

use super::remap::{self, harmonize};
use super::{check_first_year, AlertData, AlertDriver, FetchRequest};
use crate::config::DriverSpec;
use crate::date::DateEncoding;
use crate::error::Result;
use crate::source::RasterSource;

pub struct Radd {
    source: Arc<dyn RasterSource>,
    spec: DriverSpec,
}

impl Radd {
    pub const ID: &'static str = "RADD";

    pub fn new(source: Arc<dyn RasterSource>, spec: DriverSpec) -> Self {
        Self { source, spec }
    }
}

impl AlertDriver for Radd {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        check_first_year(Self::ID, &self.spec, req)?;
        let bounds = req.aoi_bounds()?;
        let alert = self.source.band(&self.spec.asset, "Alert", &bounds)?;
        let dates = self.source.band(&self.spec.asset, "Date", &bounds)?;
        let raster = harmonize(Self::ID, &alert, &dates, |v| remap::RADD.class(v), DateEncoding::YearJulian, req)?;
        Ok(AlertData::Raster(raster))
    }
}
