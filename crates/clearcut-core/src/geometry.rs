//! Geographic geometry (x = lon, y = lat) on top of `geo-types`, with the
//! grid extents, pixel ownership and ground areas the pipeline needs.

use geo::coordinate_position::{CoordPos, CoordinatePosition};
use geo::{Area, BooleanOps, BoundingRect, ChamberlainDuquetteArea, Contains, Intersects, MapCoords, Rect};
use serde::{Deserialize, Serialize};

pub use geo_types::{Coord, LineString, MultiPolygon, Point, Polygon};

use crate::coords::LatLon;
use crate::error::{AlertError, Result};

// ── Bounding boxes ──────────────────────────────────────────────────────────

/// Axis-aligned extent of a grid or geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub const fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Coord {
        Coord { x: (self.min_x + self.max_x) / 2.0, y: (self.min_y + self.max_y) / 2.0 }
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(Coord { x: self.min_x, y: self.min_y }, Coord { x: self.max_x, y: self.max_y })
    }

    /// Counter-clockwise rectangle starting at the south-west corner.
    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(
            LineString::from(vec![
                (self.min_x, self.min_y),
                (self.max_x, self.min_y),
                (self.max_x, self.max_y),
                (self.min_x, self.max_y),
            ]),
            Vec::new(),
        )
    }
}

impl From<Rect> for BBox {
    fn from(r: Rect) -> Self {
        BBox::new(r.min().x, r.min().y, r.max().x, r.max().y)
    }
}

/// The box as a one-part multipolygon.
pub fn bbox_polygon(bbox: &BBox) -> MultiPolygon {
    MultiPolygon::new(vec![bbox.to_polygon()])
}

/// Extent of `geometry`, `None` when it has no coordinates.
pub fn bounds_of(geometry: &MultiPolygon) -> Option<BBox> {
    geometry.bounding_rect().map(BBox::from)
}

// ── Area operations ─────────────────────────────────────────────────────────

/// Whether `area` owns the point `p`. Interior points belong, exterior ones
/// do not, and boundary points belong only when the area continues to their
/// north-east, so adjacent tiles never both own a pixel centre.
pub fn covers(area: &MultiPolygon, p: Coord) -> bool {
    match area.coordinate_position(&p) {
        CoordPos::Inside => true,
        CoordPos::Outside => false,
        CoordPos::OnBoundary => {
            let eps = 1e-9 * (1.0 + p.x.abs().max(p.y.abs()));
            area.contains(&Point::new(p.x + eps, p.y + eps))
        }
    }
}

/// True when `geometry` and the box share any point.
pub fn intersects_bbox(geometry: &MultiPolygon, bbox: &BBox) -> bool {
    let rect = bbox.to_rect();
    geometry.0.iter().any(|p| p.intersects(&rect))
}

/// The part of `geometry` inside `bbox`; slivers without area are dropped.
pub fn clip_to_bbox(geometry: &MultiPolygon, bbox: &BBox) -> MultiPolygon {
    let clipped = geometry.intersection(&bbox_polygon(bbox));
    MultiPolygon::new(clipped.0.into_iter().filter(|p| p.unsigned_area() > 0.0).collect())
}

fn validate_polygon(poly: &Polygon) -> std::result::Result<(), String> {
    for ring in std::iter::once(poly.exterior()).chain(poly.interiors()) {
        if ring.coords().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err("non-finite coordinate".into());
        }
        let mut distinct: Vec<Coord> = ring.coords().copied().collect();
        distinct.dedup();
        if distinct.len() > 1 && distinct.first() == distinct.last() {
            distinct.pop();
        }
        if distinct.len() < 3 {
            return Err(format!("ring with {} distinct vertices", distinct.len()));
        }
    }
    if Polygon::new(poly.exterior().clone(), Vec::new()).unsigned_area() <= f64::EPSILON {
        return Err("exterior ring has no area".into());
    }
    Ok(())
}

/// Reject empty, degenerate or non-finite geometries.
pub fn validate(geometry: &MultiPolygon) -> Result<()> {
    if geometry.0.is_empty() {
        return Err(AlertError::InvalidGeometry("empty geometry".into()));
    }
    for poly in &geometry.0 {
        validate_polygon(poly).map_err(AlertError::InvalidGeometry)?;
    }
    Ok(())
}

// ── Ground areas ────────────────────────────────────────────────────────────

/// How a geographic polygon is measured on the ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaProjection {
    /// Planar area after projecting to EPSG:3857.
    #[default]
    WebMercator,
    /// Area on the WGS84-radius sphere.
    Geodesic,
}

/// Ground area in square metres.
pub fn area_m2(geometry: &MultiPolygon, projection: AreaProjection) -> f64 {
    match projection {
        AreaProjection::WebMercator => geometry
            .map_coords(|c| {
                let (x, y) = LatLon::new(c.y, c.x).to_web_mercator();
                Coord { x, y }
            })
            .unsigned_area(),
        AreaProjection::Geodesic => geometry.chamberlain_duquette_unsigned_area(),
    }
}

/// Ground area in hectares.
pub fn surface_ha(geometry: &MultiPolygon, projection: AreaProjection) -> f64 {
    area_m2(geometry, projection) / 10_000.0
}

// ── GeoJSON ─────────────────────────────────────────────────────────────────

pub fn to_geojson(geometry: &MultiPolygon) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

/// Polygons, multipolygons and collections of them; anything else is refused.
pub fn from_geojson(g: &geojson::Geometry) -> Result<MultiPolygon> {
    let invalid = |e: geojson::Error| AlertError::InvalidGeometry(e.to_string());
    match &g.value {
        geojson::Value::Polygon(_) => Ok(MultiPolygon::new(vec![Polygon::try_from(&g.value).map_err(invalid)?])),
        geojson::Value::MultiPolygon(_) => MultiPolygon::try_from(&g.value).map_err(invalid),
        geojson::Value::GeometryCollection(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(from_geojson(item)?.0);
            }
            Ok(MultiPolygon::new(out))
        }
        _ => Err(AlertError::InvalidGeometry("expected a Polygon or MultiPolygon".into())),
    }
}

/// Dissolve every polygonal feature of a GeoJSON document into one AOI.
pub fn aoi_from_geojson(doc: &geojson::GeoJson) -> Result<MultiPolygon> {
    let mut out = Vec::new();
    match doc {
        geojson::GeoJson::Geometry(g) => out.extend(from_geojson(g)?.0),
        geojson::GeoJson::Feature(f) => {
            if let Some(g) = &f.geometry {
                out.extend(from_geojson(g)?.0);
            }
        }
        geojson::GeoJson::FeatureCollection(fc) => {
            for f in &fc.features {
                if let Some(g) = &f.geometry {
                    out.extend(from_geojson(g)?.0);
                }
            }
        }
    }
    let aoi = MultiPolygon::new(out);
    validate(&aoi)?;
    Ok(aoi)
}
