//! Browser bindings for the review UI: date conversion, period splitting
//! and clumping of a raster posted as JSON.

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use clearcut_core::aggregate::{aggregate, finalize, AggregateParams, SortKey};
use clearcut_core::date;
use clearcut_core::geometry::{BBox, MultiPolygon};
use clearcut_core::grid::AlertRaster;
use clearcut_core::table::{AlertPatch, AlertTable};
use clearcut_core::temporal::{split, DateRange};
use clearcut_core::tiler::tile;

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Canonical `YYYY.DDD` → `YYYY-MM-DD`.
#[wasm_bindgen]
pub fn decode_date(value: f64) -> Result<String, JsValue> {
    date::decode(value).map(|d| d.to_string()).map_err(js_err)
}

/// `YYYY-MM-DD` → canonical `YYYY.DDD`.
#[wasm_bindgen]
pub fn encode_date(iso: &str) -> Result<f64, JsValue> {
    date::parse_iso(iso).map(date::encode).map_err(js_err)
}

#[derive(Serialize)]
struct Period {
    start: String,
    end: String,
}

/// Single-year pieces of `[start, end]` as `[{start, end}, …]`.
#[wasm_bindgen]
pub fn split_period(start: &str, end: &str) -> Result<JsValue, JsValue> {
    let range = DateRange::new(date::parse_iso(start).map_err(js_err)?, date::parse_iso(end).map_err(js_err)?)
        .map_err(js_err)?;
    let pieces: Vec<Period> = split(range)
        .into_iter()
        .map(|r| Period { start: r.start.to_string(), end: r.end.to_string() })
        .collect();
    serde_wasm_bindgen::to_value(&pieces).map_err(js_err)
}

/// Row-major bands, row 0 south. JSON has no NaN, so missing dates are `null`.
#[derive(Deserialize)]
struct PostedRaster {
    width: usize,
    height: usize,
    bounds: BBox,
    alert: Vec<u8>,
    date: Vec<Option<f64>>,
}

impl PostedRaster {
    fn into_raster(self) -> Result<AlertRaster, String> {
        let n = self.width * self.height;
        if self.alert.len() != n || self.date.len() != n {
            return Err(format!("expected {n} pixels per band"));
        }
        let mut raster = AlertRaster::masked(self.width, self.height, self.bounds);
        for (i, (class, d)) in self.alert.into_iter().zip(self.date).enumerate() {
            raster.set(i / self.width, i % self.width, class, d.unwrap_or(f64::NAN));
        }
        Ok(raster)
    }
}

#[derive(Deserialize)]
struct AggregateRequest {
    raster: PostedRaster,
    aoi: MultiPolygon,
    #[serde(default)]
    min_size: f64,
    #[serde(default = "default_cell")]
    cell_size_deg: f64,
    #[serde(default)]
    params: AggregateParams,
    #[serde(default)]
    sort: SortKey,
}

fn default_cell() -> f64 {
    0.1
}

#[derive(Serialize)]
struct AggregateResponse {
    patches: Vec<AlertPatch>,
}

fn run_aggregate(req: AggregateRequest) -> Result<Vec<AlertPatch>, String> {
    let raster = req.raster.into_raster()?;
    let mut features = Vec::new();
    for t in tile(&req.aoi, req.cell_size_deg).map_err(|e| e.to_string())? {
        features.extend(aggregate(&raster, &t.geometry, &req.params).map_err(|e| e.to_string())?);
    }
    let rows = finalize(features, Some(req.min_size), req.sort).map_err(|e| e.to_string())?;
    Ok(AlertTable::new(rows, req.params.area_projection).patches().to_vec())
}

/// Clump a posted alert raster over an AOI; the request is JSON with
/// `raster`, `aoi`, and optional `min_size`, `cell_size_deg`, `params`, `sort`.
#[wasm_bindgen]
pub fn aggregate_alerts(request_json: &str) -> Result<JsValue, JsValue> {
    let req: AggregateRequest =
        serde_json::from_str(request_json).map_err(|e| JsValue::from_str(&format!("Invalid request: {e}")))?;
    let patches = run_aggregate(req).map_err(js_err)?;
    serde_wasm_bindgen::to_value(&AggregateResponse { patches }).map_err(js_err)
}
