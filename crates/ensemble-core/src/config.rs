//! Run-wide workflow constants, serialisable so a JSON file can override them.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, Result};

/// The nine districts the pixel and cultivar tables were prepared for.
pub const DISTRICTS: [&str; 9] = [
    "Buhera",
    "Mutare Rural",
    "Chivi",
    "Zaka",
    "Binga",
    "Hwange Rural",
    "Lupane",
    "Nkayi",
    "Tsholotsho",
];

/// Month/day of the fixed simulation start inside the target year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    /// The date in `year`. `None` if the month/day does not exist that year.
    pub fn in_year(self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }

    /// Whether this month/day exists in some year (Feb 29 counts).
    pub fn is_valid(self) -> bool {
        self.in_year(2000).is_some()
    }
}

/// Workflow parameters. Defaults reproduce the single-crop district workflow:
/// 50 members, 10 split nitrogen applications inside 70% of the season,
/// simulation starting Aug 10 with a 360-day horizon past the last planting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Number of ensemble members per district run.
    pub ensemble_size: usize,
    /// Number of split fertilizer applications.
    pub n_fert_apps: u32,
    /// Nitrogen content of the applied product, 0-1.
    pub n_ratio: f64,
    /// Fraction of the cultivar season over which applications are spread.
    pub fert_window: f64,
    /// Crop name handed to the engine when opening a session.
    pub crop: String,
    pub season_start: MonthDay,
    /// Days added to the latest planting date to get the simulation horizon.
    pub horizon_days: u64,
    /// Directory holding `Soil/` and `Weather/` input files.
    pub input_root: PathBuf,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            ensemble_size: 50,
            n_fert_apps: 10,
            n_ratio: 1.0,
            fert_window: 0.7,
            crop: "Maize".to_string(),
            season_start: MonthDay { month: 8, day: 10 },
            horizon_days: 360,
            input_root: PathBuf::from("data/DSSAT_input"),
        }
    }
}

impl EnsembleConfig {
    /// Load from a JSON file; omitted fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let MonthDay { month, day } = self.season_start;
        if !self.season_start.is_valid() {
            return Err(EnsembleError::InvalidSeasonStart { month, day });
        }
        Ok(())
    }
}
