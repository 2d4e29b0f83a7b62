//! Canonical alert dates and the native encodings they are harmonized from.
//!
//! The canonical value is `year + julian_day / 1000`, e.g. `2021.205` for day
//! 205 of 2021. Three decimals hold the julian day exactly, so reducers such
//! as `min` over canonical values order dates correctly.
//!
//! Native products store dates as day-of-year ints for a fixed year, `YYDDD`
//! ints, day counts since a fixed epoch, proleptic Gregorian ordinals or
//! decimal years. [`DateEncoding`] converts each one to canonical and encodes
//! window bounds in the native unit so masking compares like with like.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};

// ── Canonical encoding ────────────────────────────────────────────────────────

/// Gregorian leap-year predicate. No table, no horizon.
pub const fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

pub const fn days_in_year(year: i32) -> i64 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Last year a day count may land in; later dates are treated as corrupt
/// pixels rather than real detections.
pub const LATEST_YEAR: i32 = 9999;

/// `date` → `year + julian_day / 1000`.
pub fn encode(date: NaiveDate) -> f64 {
    date.year() as f64 + date.ordinal() as f64 / 1000.0
}

/// Inverse of [`encode`]. The julian day is rounded to the nearest integer so
/// values that went through `f32` storage still decode.
pub fn decode(value: f64) -> Result<NaiveDate> {
    if !value.is_finite() {
        return Err(AlertError::InvalidDate(format!("{value}")));
    }
    let year = value.floor();
    let jday = ((value - year) * 1000.0).round() as u32;
    NaiveDate::from_yo_opt(year as i32, jday)
        .ok_or_else(|| AlertError::InvalidDate(format!("{value:.3} is not a valid YYYY.DDD date")))
}

/// Parse `YYYY-MM-DD`.
pub fn parse_iso(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| AlertError::InvalidDate(format!("`{s}`: {e}")))
}

/// Parse either `YYYY-MM-DD` or an already canonical `YYYY.DDD` value.
pub fn parse_any(s: &str) -> Result<NaiveDate> {
    if s.contains('-') {
        return parse_iso(s);
    }
    let v: f64 = s
        .trim()
        .parse()
        .map_err(|_| AlertError::InvalidDate(format!("`{s}` is neither YYYY-MM-DD nor YYYY.DDD")))?;
    decode(v)
}

// ── Day counts since an epoch ────────────────────────────────────────────────

/// A raster encoding that stores "days elapsed since `epoch`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCountEpoch {
    pub epoch: NaiveDate,
}

impl DayCountEpoch {
    pub const fn new(epoch: NaiveDate) -> Self {
        Self { epoch }
    }

    /// Convert a day count to a calendar date.
    ///
    /// The year is first estimated by dividing the elapsed days (counted from
    /// January 1st of the epoch year) by 365 and flooring. That estimate can
    /// only overshoot, by one day per leap year crossed, so it is corrected
    /// by walking back while the year's first day lies beyond the target,
    /// with leap years counted by [`is_leap_year`]. The remainder is the day
    /// offset inside the corrected year.
    ///
    /// Counts that reach past [`LATEST_YEAR`] fail with
    /// [`AlertError::InvalidEpoch`].
    pub fn to_date(&self, days: i64) -> Result<NaiveDate> {
        let invalid = || AlertError::InvalidEpoch { epoch: self.epoch, days };
        if days < 0 {
            return Err(invalid());
        }
        let epoch_year = self.epoch.year();
        let elapsed = (self.epoch.ordinal0() as i64).checked_add(days).ok_or_else(invalid)?;
        if elapsed >= days_to_year_start(epoch_year, LATEST_YEAR + 1) {
            return Err(invalid());
        }

        let mut year = i32::try_from(elapsed / 365)
            .ok()
            .and_then(|span| epoch_year.checked_add(span))
            .ok_or_else(invalid)?;
        let mut year_start = days_to_year_start(epoch_year, year);
        while year_start > elapsed {
            year -= 1;
            year_start -= days_in_year(year);
        }
        let ordinal = (elapsed - year_start + 1) as u32;
        NaiveDate::from_yo_opt(year, ordinal).ok_or_else(invalid)
    }

    /// `days_since_epoch` → canonical `YYYY.DDD`.
    pub fn to_canonical(&self, days: i64) -> Result<f64> {
        self.to_date(days).map(encode)
    }

    /// Inverse of [`to_date`](Self::to_date).
    pub fn days_since(&self, date: NaiveDate) -> Result<i64> {
        let days = (date - self.epoch).num_days();
        if days < 0 {
            return Err(AlertError::InvalidEpoch { epoch: self.epoch, days });
        }
        Ok(days)
    }
}

/// Days between Jan 1st of `from` and Jan 1st of `to`, negative when `to < from`.
fn days_to_year_start(from: i32, to: i32) -> i64 {
    let span = to as i64 - from as i64;
    let leaps = leap_years_before(to) - leap_years_before(from);
    span * 365 + leaps
}

/// Number of leap years in `[1, year)`.
fn leap_years_before(year: i32) -> i64 {
    let y = year as i64 - 1;
    y / 4 - y / 100 + y / 400
}

// ── Native encodings ─────────────────────────────────────────────────────────

/// How a product stores its per-pixel detection date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DateEncoding {
    /// Day of year (1..=366) of a known year.
    JulianDay { year: i32 },
    /// `YY * 1000 + DDD`, years 2000..=2099.
    YearJulian,
    /// Days elapsed since an epoch day.
    DaysSince { epoch: NaiveDate },
    /// Proleptic Gregorian ordinal, 0001-01-01 = 1.
    ProlepticOrdinal,
    /// `year + (day_of_year - 1) / days_in_year`.
    DecimalYear,
    /// Already `YYYY.DDD`.
    Canonical,
}

impl DateEncoding {
    /// Decode one native value. `None` for no-data or out-of-domain values.
    pub fn to_date(&self, raw: f64) -> Option<NaiveDate> {
        if !raw.is_finite() {
            return None;
        }
        match *self {
            DateEncoding::JulianDay { year } => {
                let day = u32::try_from(raw.round() as i64).ok().filter(|&d| d >= 1)?;
                NaiveDate::from_yo_opt(year, day)
            }
            DateEncoding::YearJulian => {
                let v = raw.round() as i64;
                if !(1..100_000).contains(&v) {
                    return None;
                }
                NaiveDate::from_yo_opt(2000 + (v / 1000) as i32, (v % 1000) as u32)
            }
            DateEncoding::DaysSince { epoch } => DayCountEpoch::new(epoch).to_date(raw.round() as i64).ok(),
            DateEncoding::ProlepticOrdinal => {
                let v = raw.round() as i64;
                if v < 1 || v > i32::MAX as i64 {
                    return None;
                }
                NaiveDate::from_num_days_from_ce_opt(v as i32)
            }
            DateEncoding::DecimalYear => {
                let year = raw.floor();
                let day0 = ((raw - year) * days_in_year(year as i32) as f64 + 1e-6).floor();
                NaiveDate::from_yo_opt(year as i32, day0 as u32 + 1)
            }
            DateEncoding::Canonical => decode(raw).ok(),
        }
    }

    /// Decode one native value straight to canonical `YYYY.DDD`.
    pub fn to_canonical(&self, raw: f64) -> Option<f64> {
        self.to_date(raw).map(encode)
    }

    /// Encode a date in the native unit, for window comparisons.
    ///
    /// Monotonic over all dates, including ones outside the encoding's
    /// natural domain (a `JulianDay` bound for the next January 1st is 366
    /// or 367).
    pub fn encode_bound(&self, date: NaiveDate) -> f64 {
        match *self {
            DateEncoding::JulianDay { year } => {
                let jan1 = NaiveDate::from_yo_opt(year, 1).unwrap_or(date);
                ((date - jan1).num_days() + 1) as f64
            }
            DateEncoding::YearJulian => ((date.year() - 2000) as i64 * 1000 + date.ordinal() as i64) as f64,
            DateEncoding::DaysSince { epoch } => (date - epoch).num_days() as f64,
            DateEncoding::ProlepticOrdinal => date.num_days_from_ce() as f64,
            DateEncoding::DecimalYear => {
                date.year() as f64 + date.ordinal0() as f64 / days_in_year(date.year()) as f64
            }
            DateEncoding::Canonical => encode(date),
        }
    }

    /// Inclusive `[start, end]` window expressed in this encoding.
    pub fn window(&self, start: NaiveDate, end: NaiveDate) -> NativeWindow {
        let after_end = end.checked_add_signed(Duration::days(1)).unwrap_or(end);
        NativeWindow {
            lo: self.encode_bound(start),
            hi_exclusive: self.encode_bound(after_end),
        }
    }

    /// Parse the short names accepted in driver parameters.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "decimal_year" => Some(DateEncoding::DecimalYear),
            "year_julian" | "yyddd" => Some(DateEncoding::YearJulian),
            "ordinal" | "proleptic_ordinal" => Some(DateEncoding::ProlepticOrdinal),
            "canonical" => Some(DateEncoding::Canonical),
            _ => None,
        }
    }
}

/// A date window in native units. `lo` inclusive, `hi_exclusive` exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeWindow {
    pub lo: f64,
    pub hi_exclusive: f64,
}

impl NativeWindow {
    #[inline]
    pub fn contains(&self, raw: f64) -> bool {
        raw >= self.lo && raw < self.hi_exclusive
    }
}
