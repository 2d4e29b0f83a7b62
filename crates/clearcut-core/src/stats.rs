//! Patch-size statistics: per-patch pixel counts of a labeled alert map and
//! the per-class distribution of those counts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::aggregate::label::label_components;
use crate::error::ExportError;
use crate::grid::Grid;
use crate::table::AlertTable;

/// One connected patch of the alert map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatchStat {
    #[serde(rename = "patchId")]
    pub patch_id: u32,
    pub nb_pixel: usize,
    /// Alert class of the patch.
    pub value: u8,
}

/// Label `alert` and count every patch. Background (class 0) is skipped.
pub fn patch_stats(alert: &Grid<u8>, max_patch_pixels: usize) -> Vec<PatchStat> {
    let labels = label_components(alert, max_patch_pixels);
    (0..labels.count())
        .map(|i| PatchStat { patch_id: i as u32 + 1, nb_pixel: labels.sizes[i], value: labels.classes[i] })
        .collect()
}

/// Number of patches per `nb_pixel` value, for each alert class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
    classes: BTreeMap<u8, BTreeMap<usize, usize>>,
}

impl Distribution {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u8, usize)>) -> Self {
        let mut d = Self::default();
        for (class, nb_pixel) in pairs {
            if class == 0 {
                continue;
            }
            *d.classes.entry(class).or_default().entry(nb_pixel).or_default() += 1;
        }
        d
    }

    pub fn from_stats(stats: &[PatchStat]) -> Self {
        Self::from_pairs(stats.iter().map(|s| (s.value, s.nb_pixel)))
    }

    pub fn from_table(table: &AlertTable) -> Self {
        Self::from_pairs(table.iter().map(|p| (p.alert, p.nb_pixel)))
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Patches of `class` that have exactly `nb_pixel` pixels.
    pub fn count(&self, class: u8, nb_pixel: usize) -> usize {
        self.classes.get(&class).and_then(|m| m.get(&nb_pixel)).copied().unwrap_or(0)
    }

    pub fn total(&self, class: u8) -> usize {
        self.classes.get(&class).map_or(0, |m| m.values().sum())
    }

    /// Every patch size seen in any class, ascending.
    pub fn sizes(&self) -> Vec<usize> {
        let all: BTreeSet<usize> = self.classes.values().flat_map(|m| m.keys().copied()).collect();
        all.into_iter().collect()
    }

    /// One row per class, one column per patch size, zero-filled.
    pub fn write_csv(&self, path: &Path) -> Result<(), ExportError> {
        let sizes = self.sizes();
        let mut w = csv::Writer::from_path(path)?;
        let mut header = vec![String::new()];
        header.extend(sizes.iter().map(usize::to_string));
        w.write_record(&header)?;
        for &class in self.classes.keys() {
            let mut row = vec![class_name(class).to_string()];
            row.extend(sizes.iter().map(|&s| self.count(class, s).to_string()));
            w.write_record(&row)?;
        }
        w.flush()?;
        info!(path = %path.display(), sizes = sizes.len(), "wrote patch-size distribution");
        Ok(())
    }
}

fn class_name(class: u8) -> &'static str {
    match class {
        1 => "confirmed alerts",
        2 => "potential alerts",
        _ => "other",
    }
}

/// Per-patch rows as `patchId,nb_pixel,value`.
pub fn write_patch_stats(stats: &[PatchStat], path: &Path) -> Result<(), ExportError> {
    let mut w = csv::Writer::from_path(path)?;
    for s in stats {
        w.serialize(s)?;
    }
    w.flush()?;
    Ok(())
}
