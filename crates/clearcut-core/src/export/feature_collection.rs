//! GeoJSON export, also the format the review UI and `RECOVER` read.

use std::fs;
use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue};

use super::geometry_from_json;
use crate::error::ExportError;
use crate::geometry::{from_geojson, to_geojson};
use crate::table::{AlertPatch, AlertTable, Review};

/// Feature properties of one row. `original_geometry` is a nested geometry
/// object.
pub fn properties(p: &AlertPatch) -> JsonObject {
    let mut props = JsonObject::new();
    props.insert("id".into(), p.id.into());
    props.insert("alert".into(), p.alert.into());
    props.insert("date".into(), p.date.into());
    props.insert("surface".into(), p.surface.into());
    props.insert("nb_pixel".into(), p.nb_pixel.into());
    props.insert("review".into(), p.review.as_str().into());
    props.insert("comment".into(), p.comment.clone().into());
    props.insert(
        "original_geometry".into(),
        serde_json::to_value(to_geojson(&p.original_geometry)).unwrap_or(JsonValue::Null),
    );
    props
}

pub fn to_feature_collection(table: &AlertTable) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: table
            .iter()
            .map(|p| Feature {
                bbox: None,
                geometry: Some(to_geojson(&p.geometry)),
                id: None,
                properties: Some(properties(p)),
                foreign_members: None,
            })
            .collect(),
        foreign_members: None,
    }
}

pub fn write(table: &AlertTable, path: &Path) -> Result<(), ExportError> {
    fs::write(path, GeoJson::from(to_feature_collection(table)).to_string())?;
    Ok(())
}

fn number(props: &JsonObject, key: &str) -> Option<f64> {
    props.get(key).and_then(JsonValue::as_f64)
}

fn text<'a>(props: &'a JsonObject, key: &str) -> &'a str {
    props.get(key).and_then(JsonValue::as_str).unwrap_or("")
}

/// Rebuild one row. Missing fields fall back to: `id` = position,
/// `alert` = 1, `surface` = NaN (recomputed by the caller), and
/// `original_geometry` = current geometry.
pub fn from_feature(index: usize, f: &Feature) -> Result<AlertPatch, ExportError> {
    let geometry = f
        .geometry
        .as_ref()
        .ok_or_else(|| ExportError::Geometry(format!("feature {index} has no geometry")))
        .and_then(|g| from_geojson(g).map_err(|e| ExportError::Geometry(e.to_string())))?;
    let empty = JsonObject::new();
    let props = f.properties.as_ref().unwrap_or(&empty);
    let original_geometry = match props.get("original_geometry") {
        Some(JsonValue::String(s)) => geometry_from_json(s)?,
        Some(v @ JsonValue::Object(_)) => geometry_from_json(&v.to_string())?,
        _ => geometry.clone(),
    };
    Ok(AlertPatch {
        id: number(props, "id").map_or(index as u32, |v| v as u32),
        original_geometry,
        geometry,
        alert: number(props, "alert").map_or(1, |v| v as u8),
        date: number(props, "date").unwrap_or(f64::NAN),
        surface: number(props, "surface").unwrap_or(f64::NAN),
        nb_pixel: number(props, "nb_pixel").map_or(0, |v| v as usize),
        review: Review::parse(text(props, "review")),
        comment: text(props, "comment").to_string(),
    })
}

pub fn read(path: &Path) -> Result<Vec<AlertPatch>, ExportError> {
    let doc: GeoJson = fs::read_to_string(path)?
        .parse()
        .map_err(|e: geojson::Error| ExportError::Geometry(e.to_string()))?;
    let fc = FeatureCollection::try_from(doc).map_err(|e| ExportError::Geometry(e.to_string()))?;
    fc.features.iter().enumerate().map(|(i, f)| from_feature(i, f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fixtures;

    /// ✓ Review state, comments and both geometries survive a write/read cycle.
    #[test]
    fn geojson_keeps_review_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.geojson");
        let t = fixtures::table();
        write(&t, &path).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.len(), t.len());
        for (got, want) in back.iter().zip(t.iter()) {
            assert_eq!(got.geometry, want.geometry);
            assert_eq!(got.original_geometry, want.original_geometry);
            assert_eq!((got.id, got.alert, got.nb_pixel), (want.id, want.alert, want.nb_pixel));
            assert_eq!((got.review, got.comment.as_str()), (want.review, want.comment.as_str()));
            assert!((got.surface - want.surface).abs() < 1e-9 * want.surface, "row {}", want.id);
        }
        assert!(back[1].is_edited());
    }

    #[test]
    fn bare_features_get_defaults() {
        let f: Feature = r#"{"type":"Feature","properties":null,
            "geometry":{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}}"#
            .parse::<GeoJson>()
            .ok()
            .and_then(|g| Feature::try_from(g).ok())
            .unwrap();
        let p = from_feature(4, &f).unwrap();
        assert_eq!((p.id, p.alert, p.review), (4, 1, Review::Unset));
        assert!(p.surface.is_nan());
        assert_eq!(p.original_geometry, p.geometry);
    }
}
