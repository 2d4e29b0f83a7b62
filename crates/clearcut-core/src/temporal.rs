//! Year splitting for drivers that only serve single calendar years.

use chrono::{Datelike, NaiveDate};
use tracing::{debug, warn};

use crate::drivers::{AlertData, AlertDriver, FetchRequest};
use crate::error::{AlertError, Result};
use crate::grid::AlertRaster;

/// An inclusive `[start, end]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(AlertError::InvalidDate(format!("end {end} is before start {start}")));
        }
        Ok(Self { start, end })
    }

    pub fn single_year(&self) -> bool {
        self.start.year() == self.end.year()
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Cut `[start, end]` at every Dec 31 / Jan 1 boundary, in chronological
/// order. A window inside one year comes back unchanged.
pub fn split(range: DateRange) -> Vec<DateRange> {
    let mut out = Vec::new();
    let mut start = range.start;
    while start.year() < range.end.year() {
        let Some(dec31) = NaiveDate::from_ymd_opt(start.year(), 12, 31) else {
            break;
        };
        out.push(DateRange { start, end: dec31 });
        match dec31.succ_opt() {
            Some(next) => start = next,
            None => return out,
        }
    }
    out.push(DateRange { start, end: range.end });
    out
}

/// Fetch through `driver`, splitting by year when it only serves single
/// years. Raster pieces are mosaicked in chronological order so the later
/// year wins on overlap; feature pieces are concatenated. Years with
/// nothing to show are skipped, the call fails with `EmptyResult` only
/// when every year is empty.
pub fn fetch_split(driver: &dyn AlertDriver, req: &FetchRequest<'_>) -> Result<AlertData> {
    let range = DateRange::new(req.start, req.end)?;
    if !driver.single_year() || range.single_year() {
        return driver.fetch(req);
    }

    let pieces = split(range);
    debug!(driver = driver.id(), years = pieces.len(), "splitting request by year");
    let mut rasters = Vec::new();
    let mut features = Vec::new();
    for piece in pieces {
        match driver.fetch(&req.with_range(piece.start, piece.end)) {
            Ok(AlertData::Raster(r)) => rasters.push(r),
            Ok(AlertData::Features(f)) => features.extend(f),
            Ok(AlertData::Reviewed(_)) => {
                return Err(AlertError::Config(format!("{} cannot be split by year", driver.id())))
            }
            Err(AlertError::EmptyResult(what)) => {
                warn!(driver = driver.id(), start = %piece.start, end = %piece.end, %what, "no alerts in year");
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(mosaic) = AlertRaster::mosaic(rasters) {
        return Ok(AlertData::Raster(mosaic));
    }
    if !features.is_empty() {
        return Ok(AlertData::Features(features));
    }
    Err(AlertError::EmptyResult(format!("{} {}..{}", driver.id(), req.start, req.end)))
}
