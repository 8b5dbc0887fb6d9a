/// Soil and weather file naming, matching the engine's input directory layout:
///
///   <root>/Soil/-020p25_0030p75.SOL
///   <root>/Weather/-020p25_0030p75_2001.WTH   (year 2020, file suffix "01")
///
/// Any deviation here only surfaces later as a missing file inside the engine.

use std::path::{Path, PathBuf};

use crate::coords::LatLon;

pub const SOIL_DIR: &str = "Soil";
pub const WEATHER_DIR: &str = "Weather";
pub const SOIL_EXT: &str = ".SOL";
pub const WEATHER_EXT: &str = ".WTH";

pub fn soil_file_name(loc: LatLon) -> String {
    format!("{}{SOIL_EXT}", loc.file_stem().replace('.', "p"))
}

pub fn weather_file_name(loc: LatLon, year: i32) -> String {
    let yy = year.rem_euclid(100);
    format!("{}_{yy:02}01{WEATHER_EXT}", loc.file_stem().replace('.', "p"))
}

/// Input tree the engine reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLayout {
    root: PathBuf,
}

impl InputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn soil_path(&self, loc: LatLon) -> PathBuf {
        self.root.join(SOIL_DIR).join(soil_file_name(loc))
    }

    pub fn weather_path(&self, loc: LatLon, year: i32) -> PathBuf {
        self.root.join(WEATHER_DIR).join(weather_file_name(loc, year))
    }
}
