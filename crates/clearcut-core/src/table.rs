//! The alert table: one row per patch, mutated in place by review.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::PatchFeature;
use crate::date;
use crate::error::EditError;
use crate::geometry::{surface_ha, validate, AreaProjection, MultiPolygon};

/// Analyst verdict on a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Review {
    #[default]
    Unset,
    Yes,
    No,
}

impl Review {
    pub fn as_str(&self) -> &'static str {
        match self {
            Review::Unset => "unset",
            Review::Yes => "yes",
            Review::No => "no",
        }
    }

    /// Lenient parse for imported files; anything unknown is `Unset`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Review::Yes,
            "no" | "false" | "0" => Review::No,
            _ => Review::Unset,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPatch {
    pub id: u32,
    pub geometry: MultiPolygon,
    /// Geometry at creation, restored by a revert.
    pub original_geometry: MultiPolygon,
    pub alert: u8,
    pub date: f64,
    /// Hectares, always consistent with `geometry`.
    pub surface: f64,
    pub nb_pixel: usize,
    #[serde(default)]
    pub review: Review,
    #[serde(default)]
    pub comment: String,
}

impl AlertPatch {
    pub fn from_feature(id: u32, f: PatchFeature) -> Self {
        Self {
            id,
            original_geometry: f.geometry.clone(),
            geometry: f.geometry,
            alert: f.alert,
            date: f.date,
            surface: f.surface,
            nb_pixel: f.nb_pixel,
            review: Review::Unset,
            comment: String::new(),
        }
    }

    pub fn is_edited(&self) -> bool {
        self.geometry != self.original_geometry
    }
}

/// A single row change requested by a reviewer.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Review(Review),
    Comment(String),
    /// Replace the geometry; `None` reverts to the original one.
    Geometry(Option<MultiPolygon>),
    /// New date as `YYYY-MM-DD` or canonical `YYYY.DDD`.
    Date(String),
}

/// Rows of one query, in ID order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertTable {
    patches: Vec<AlertPatch>,
    #[serde(default)]
    projection: AreaProjection,
}

impl AlertTable {
    pub fn new(patches: Vec<AlertPatch>, projection: AreaProjection) -> Self {
        Self { patches, projection }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn patches(&self) -> &[AlertPatch] {
        &self.patches
    }

    pub fn iter(&self) -> impl Iterator<Item = &AlertPatch> {
        self.patches.iter()
    }

    pub fn projection(&self) -> AreaProjection {
        self.projection
    }

    pub fn get(&self, id: u32) -> Option<&AlertPatch> {
        self.patches.iter().find(|p| p.id == id)
    }

    /// Apply `mutation` to row `id`. The new value is fully validated before
    /// anything is written, so a rejected edit leaves the row unchanged.
    pub fn edit(&mut self, id: u32, mutation: Mutation) -> Result<&AlertPatch, EditError> {
        let projection = self.projection;
        let row = self
            .patches
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(EditError::UnknownId(id))?;

        match mutation {
            Mutation::Review(r) => row.review = r,
            Mutation::Comment(c) => row.comment = c,
            Mutation::Geometry(None) => {
                row.geometry = row.original_geometry.clone();
                row.surface = surface_ha(&row.geometry, projection);
            }
            Mutation::Geometry(Some(g)) => {
                validate(&g).map_err(|e| EditError::InvalidGeometry(e.to_string()))?;
                row.surface = surface_ha(&g, projection);
                row.geometry = g;
            }
            Mutation::Date(text) => {
                let d = date::parse_any(&text).map_err(|e| EditError::InvalidDate(e.to_string()))?;
                row.date = date::encode(d);
            }
        }
        debug!(id, "edited patch");
        Ok(row)
    }
}

impl<'a> IntoIterator for &'a AlertTable {
    type Item = &'a AlertPatch;
    type IntoIter = std::slice::Iter<'a, AlertPatch>;

    fn into_iter(self) -> Self::IntoIter {
        self.patches.iter()
    }
}
