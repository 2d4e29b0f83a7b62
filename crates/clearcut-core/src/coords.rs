//! Geographic points and the metric conversions used for ground areas and
//! working resolutions.

/// WGS84 semi-major axis, also the Web Mercator sphere radius.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;
/// Length of one degree of latitude, and of longitude at the equator.
pub const METRES_PER_DEGREE: f64 = 111_320.0;
/// Web Mercator is undefined at the poles; latitudes are clamped to this.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_6;

/// A point in geographic coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    /// Latitude in degrees, -90 to +90.
    pub lat: f64,
    /// Longitude in degrees, -180 to +180.
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// EPSG:3857 metres `(x, y)`.
    pub fn to_web_mercator(self) -> (f64, f64) {
        let lat = self.lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
        let x = EARTH_RADIUS_M * self.lon.to_radians();
        let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
        (x, y)
    }

    /// Inverse of [`to_web_mercator`](Self::to_web_mercator).
    pub fn from_web_mercator(x: f64, y: f64) -> Self {
        let lon = (x / EARTH_RADIUS_M).to_degrees();
        let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
        Self { lat, lon }
    }
}

/// Pixel size in degrees `(d_lon, d_lat)` for a ground resolution of
/// `scale_m` metres at latitude `lat`.
pub fn degrees_for_scale(scale_m: f64, lat: f64) -> (f64, f64) {
    let d_lat = scale_m / METRES_PER_DEGREE;
    let cos = lat.to_radians().cos().max(1e-6);
    (d_lat / cos, d_lat)
}
