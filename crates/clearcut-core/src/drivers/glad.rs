//! GLAD alerts: Landsat (`GLAD-L`, one collection per year) and Sentinel-2
//! (`GLAD-S`, one rolling product dated in days since 2018-12-31).

use std::sync::Arc;

use chrono::Datelike;
use tracing::debug;

use super::remap::{self, harmonize};
use super::{check_first_year, AlertData, AlertDriver, FetchRequest};
use crate::config::DriverSpec;
use crate::date::{self, DateEncoding};
use crate::error::{AlertError, Result};
use crate::source::RasterSource;

/// Day zero of the GLAD-S `alertDate` band.
pub const GLAD_S_EPOCH: &str = "2018-12-31";

pub struct GladLandsat {
    source: Arc<dyn RasterSource>,
    spec: DriverSpec,
}

impl GladLandsat {
    pub const ID: &'static str = "GLAD-L";

    pub fn new(source: Arc<dyn RasterSource>, spec: DriverSpec) -> Self {
        Self { source, spec }
    }

    /// Years before the catalog cutoff read the finalised archive, later
    /// years the continuously updated product.
    pub fn asset_for_year(&self, year: i32) -> String {
        match self.spec.last_updated {
            Some(cutoff) if year < cutoff => format!("{}/{year}final", self.spec.asset),
            _ => format!("{}/UpdResult", self.spec.asset),
        }
    }
}

impl AlertDriver for GladLandsat {
    fn id(&self) -> &str {
        Self::ID
    }

    fn single_year(&self) -> bool {
        true
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        check_first_year(Self::ID, &self.spec, req)?;
        let year = req.start.year();
        if req.end.year() != year {
            return Err(AlertError::UnsupportedDateRange {
                driver: Self::ID.to_string(),
                start: req.start,
                end: req.end,
                reason: "window must lie within one calendar year".into(),
            });
        }
        let asset = self.asset_for_year(year);
        let yy = year.rem_euclid(100);
        debug!(driver = Self::ID, %asset, year, "reading yearly collection");

        let bounds = req.aoi_bounds()?;
        let conf = self.source.band(&asset, &format!("conf{yy:02}"), &bounds)?;
        let dates = self.source.band(&asset, &format!("alertDate{yy:02}"), &bounds)?;
        let raster = harmonize(
            Self::ID,
            &conf,
            &dates,
            |v| remap::GLAD_L.class(v),
            DateEncoding::JulianDay { year },
            req,
        )?;
        Ok(AlertData::Raster(raster))
    }
}

pub struct GladSentinel {
    source: Arc<dyn RasterSource>,
    spec: DriverSpec,
}

impl GladSentinel {
    pub const ID: &'static str = "GLAD-S";

    pub fn new(source: Arc<dyn RasterSource>, spec: DriverSpec) -> Self {
        Self { source, spec }
    }
}

impl AlertDriver for GladSentinel {
    fn id(&self) -> &str {
        Self::ID
    }

    fn fetch(&self, req: &FetchRequest<'_>) -> Result<AlertData> {
        check_first_year(Self::ID, &self.spec, req)?;
        let epoch = date::parse_iso(req.params.get_or("epoch", GLAD_S_EPOCH))?;
        let bounds = req.aoi_bounds()?;
        let alert = self.source.band(&self.spec.asset, "alert", &bounds)?;
        let dates = self.source.band(&self.spec.asset, "alertDate", &bounds)?;
        let raster = harmonize(
            Self::ID,
            &alert,
            &dates,
            |v| remap::GLAD_S.class(v),
            DateEncoding::DaysSince { epoch },
            req,
        )?;
        Ok(AlertData::Raster(raster))
    }
}
