//! Native confidence code → canonical class tables, and the per-pixel
//! harmonization shared by all raster drivers.

use tracing::debug;

use super::FetchRequest;
use crate::date::DateEncoding;
use crate::error::{AlertError, Result};
use crate::geometry::covers;
use crate::grid::{AlertRaster, Grid};

/// Explicit lookup; codes missing from the table map to 0 (no alert).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapTable(&'static [(i64, u8)]);

impl RemapTable {
    pub const fn new(entries: &'static [(i64, u8)]) -> Self {
        Self(entries)
    }

    pub fn class(&self, raw: f64) -> u8 {
        if !raw.is_finite() {
            return 0;
        }
        let code = raw.round() as i64;
        self.0.iter().find(|(k, _)| *k == code).map_or(0, |(_, v)| *v)
    }
}

/// GLAD Landsat `confYY`: 2 = probable, 3 = confirmed.
pub const GLAD_L: RemapTable = RemapTable::new(&[(0, 0), (1, 0), (2, 2), (3, 1)]);
/// RADD `Alert`: 2 = low confidence, 3 = high confidence.
pub const RADD: RemapTable = RemapTable::new(&[(0, 0), (1, 0), (2, 2), (3, 1)]);
/// GLAD Sentinel-2 `alert`: 1–2 low, 3–4 high.
pub const GLAD_S: RemapTable = RemapTable::new(&[(0, 0), (1, 2), (2, 2), (3, 1), (4, 1)]);
/// User assets and local files already carry canonical classes.
pub const CANONICAL: RemapTable = RemapTable::new(&[(1, 1), (2, 2)]);

/// NRT detection count: 1–2 potential, 3+ confirmed, 0 masked.
pub fn nrt_class(count: f64) -> u8 {
    if !count.is_finite() {
        return 0;
    }
    match count.round() as i64 {
        c if c >= 3 => 1,
        1 | 2 => 2,
        _ => 0,
    }
}

/// CUSUM break confidence against the configured `offset`.
/// Pixels with no detected break (non-positive or no-data) are masked.
pub fn cusum_class(confidence: f64, offset: f64) -> u8 {
    if !confidence.is_finite() || confidence <= 0.0 {
        0
    } else if confidence >= offset {
        1
    } else {
        2
    }
}

/// Build the canonical raster from one native class band and one native date band.
///
/// A pixel survives when its class is non-zero, its native date falls in the
/// request window (inclusive, compared in the native encoding), the date
/// decodes, and its centre lies inside the AOI.
pub(crate) fn harmonize(
    driver: &str,
    alert: &Grid<f64>,
    date: &Grid<f64>,
    classify: impl Fn(f64) -> u8,
    encoding: DateEncoding,
    req: &FetchRequest<'_>,
) -> Result<AlertRaster> {
    let resampled;
    let date = if date.aligned_with(alert) {
        date
    } else {
        resampled = date.resample_like(alert, f64::NAN);
        &resampled
    };
    let window = encoding.window(req.start, req.end);
    let mut out = AlertRaster::masked_like(alert);
    let mut kept = 0usize;

    for r in 0..alert.height {
        for c in 0..alert.width {
            let class = classify(alert.get(r, c));
            if class == 0 {
                continue;
            }
            let raw_date = date.get(r, c);
            if !window.contains(raw_date) {
                continue;
            }
            let Some(canonical) = encoding.to_canonical(raw_date) else {
                continue;
            };
            if !covers(req.aoi, alert.pixel_center(r, c)) {
                continue;
            }
            out.set(r, c, class, canonical);
            kept += 1;
        }
    }

    debug!(driver, kept, start = %req.start, end = %req.end, "harmonized alert bands");
    if kept == 0 {
        return Err(AlertError::EmptyResult(format!("{driver} {}..{}", req.start, req.end)));
    }
    Ok(out)
}
