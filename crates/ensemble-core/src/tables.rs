//! Per-district reference tables: candidate soil/weather pixels and cultivars.
//!
//! Rows arrive already parsed from the data-preparation step (JSON arrays of
//! objects). Pixel rows are validated here, once: a row whose reference is
//! missing or unparsable, or whose start of season is missing, never becomes
//! selectable. The district key survives even when all its rows are dropped,
//! so sampling can report an empty set instead of an unknown district.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coords::LatLon;
use crate::error::{EnsembleError, Result};

// ── Input rows ───────────────────────────────────────────────────────────────

/// One row of the pixel table as produced by data preparation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelRow {
    #[serde(rename = "admin_2")]
    pub district: String,
    /// Coordinate expression such as `"(-20.25, 30.75)"`.
    #[serde(default)]
    pub pixel: Option<String>,
    /// Start of season, days from Jan 1.
    #[serde(rename = "SoS", default)]
    pub sos: Option<f64>,
}

/// One row of the cultivar table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CultivarRow {
    #[serde(rename = "admin_2")]
    pub district: String,
    pub cultivar: String,
    pub los: f64,
}

// ── Records ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRecord {
    pub location: LatLon,
    /// Recommended planting day, days after Jan 1. Negative offsets fall in
    /// the previous calendar year.
    pub sos_days: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CultivarRecord {
    pub id: String,
    /// Length of season in days.
    pub los: f64,
}

/// Counts from building the tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub pixels_kept: usize,
    pub pixels_dropped: usize,
    pub cultivars: usize,
}

// ── Tables ───────────────────────────────────────────────────────────────────

/// Read-only lookup context shared by every district run.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    pixels: HashMap<String, Vec<PixelRecord>>,
    cultivars: HashMap<String, Vec<CultivarRecord>>,
}

impl ReferenceTables {
    /// Build from parsed rows, dropping incomplete pixel rows.
    pub fn from_rows(
        pixel_rows: impl IntoIterator<Item = PixelRow>,
        cultivar_rows: impl IntoIterator<Item = CultivarRow>,
    ) -> (Self, LoadReport) {
        let mut tables = Self::default();
        let mut report = LoadReport::default();

        for row in pixel_rows {
            let entry = tables.pixels.entry(row.district.clone()).or_default();
            match pixel_record(&row) {
                Some(record) => {
                    entry.push(record);
                    report.pixels_kept += 1;
                }
                None => report.pixels_dropped += 1,
            }
        }

        for row in cultivar_rows {
            tables
                .cultivars
                .entry(row.district)
                .or_default()
                .push(CultivarRecord { id: row.cultivar, los: row.los });
            report.cultivars += 1;
        }

        debug!(
            pixels_kept = report.pixels_kept,
            pixels_dropped = report.pixels_dropped,
            cultivars = report.cultivars,
            "reference tables built"
        );
        (tables, report)
    }

    /// Load both tables from JSON row files.
    pub fn load_json(pixel_path: &Path, cultivar_path: &Path) -> Result<(Self, LoadReport)> {
        let pixel_rows: Vec<PixelRow> =
            serde_json::from_str(&std::fs::read_to_string(pixel_path)?)?;
        let cultivar_rows: Vec<CultivarRow> =
            serde_json::from_str(&std::fs::read_to_string(cultivar_path)?)?;
        Ok(Self::from_rows(pixel_rows, cultivar_rows))
    }

    /// Usable pixels for a district (possibly empty after filtering).
    pub fn pixels_for(&self, district: &str) -> Result<&[PixelRecord]> {
        self.pixels
            .get(district)
            .map(Vec::as_slice)
            .ok_or_else(|| EnsembleError::UnknownDistrict(district.to_string()))
    }

    pub fn cultivars_for(&self, district: &str) -> Result<&[CultivarRecord]> {
        self.cultivars
            .get(district)
            .map(Vec::as_slice)
            .ok_or_else(|| EnsembleError::UnknownDistrict(district.to_string()))
    }

    /// Districts present in both tables, sorted.
    pub fn districts(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .pixels
            .keys()
            .filter(|d| self.cultivars.contains_key(*d))
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }
}

fn pixel_record(row: &PixelRow) -> Option<PixelRecord> {
    let Some(expr) = row.pixel.as_deref() else {
        debug!(district = %row.district, "pixel row without reference dropped");
        return None;
    };
    let location = match expr.parse::<LatLon>() {
        Ok(loc) => loc,
        Err(e) => {
            warn!(district = %row.district, reference = expr, error = %e, "unparsable pixel reference dropped");
            return None;
        }
    };
    let sos_days = match row.sos {
        Some(v) if v.is_finite() && v.trunc() >= i32::MIN as f64 && v.trunc() <= i32::MAX as f64 => {
            v.trunc() as i32
        }
        other => {
            warn!(district = %row.district, sos = ?other, "pixel row without usable start of season dropped");
            return None;
        }
    };
    Some(PixelRecord { location, sos_days })
}
