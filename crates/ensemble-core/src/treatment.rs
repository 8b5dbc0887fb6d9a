//! Turns a sampled member into an engine-ready treatment.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::EnsembleConfig;
use crate::error::{EnsembleError, Result};
use crate::layout::InputLayout;
use crate::sampler::EnsembleMember;

/// Engine sentinel for "not applicable".
pub const MISSING: f64 = -99.0;

// ── Fertilizer ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FertilizerEvent {
    /// Days after the first application.
    pub day: u32,
    /// Nitrogen amount, kg/ha.
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct FertilizerSchedule(Vec<FertilizerEvent>);

impl FertilizerSchedule {
    /// `n_apps` equal applications, the i-th on day `i * interval`.
    pub fn split(n_apps: u32, interval: u32, amount: f64) -> Self {
        Self((0..n_apps).map(|i| FertilizerEvent { day: i * interval, amount }).collect())
    }

    pub fn events(&self) -> &[FertilizerEvent] {
        &self.0
    }

    pub fn total(&self) -> f64 {
        self.0.iter().map(|e| e.amount).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Days between split applications: `floor(window * los / n_apps)`.
/// Rejects seasons too short (or not finite) to give a positive interval.
pub fn fertilization_interval(cultivar: &str, los: f64, window: f64, n_apps: u32) -> Result<u32> {
    let invalid = || EnsembleError::InvalidSeasonLength { cultivar: cultivar.to_string(), los };
    if !los.is_finite() || n_apps == 0 {
        return Err(invalid());
    }
    let interval = (window * los / n_apps as f64).floor();
    if interval < 1.0 || interval > u32::MAX as f64 {
        return Err(invalid());
    }
    Ok(interval as u32)
}

// ── Planting ─────────────────────────────────────────────────────────────────

/// Planting management. Everything except the date is fixed for the workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlantingSpec {
    pub date: NaiveDate,
    /// Plants per m² at planting and at emergence.
    pub population: f64,
    pub population_at_emergence: f64,
    /// `S` = dry seed.
    pub method: char,
    /// `R` = rows.
    pub distribution: char,
    /// Row spacing, cm.
    pub row_spacing: f64,
    pub row_direction: f64,
    /// Planting depth, cm.
    pub depth: f64,
    pub weight: f64,
}

impl PlantingSpec {
    pub fn on(date: NaiveDate) -> Self {
        Self {
            date,
            population: 4.5,
            population_at_emergence: 4.5,
            method: 'S',
            distribution: 'R',
            row_spacing: 90.0,
            row_direction: 0.0,
            depth: 3.0,
            weight: 0.0,
        }
    }

    /// Option map keyed by the engine's planting field codes.
    pub fn to_options(&self) -> BTreeMap<&'static str, Value> {
        BTreeMap::from([
            ("PDATE", json!(self.date)),
            ("EDATE", json!(MISSING)),
            ("PPOP", json!(self.population)),
            ("PPOE", json!(self.population_at_emergence)),
            ("PLME", json!(self.method.to_string())),
            ("PLDS", json!(self.distribution.to_string())),
            ("PLRS", json!(self.row_spacing)),
            ("PLRD", json!(self.row_direction)),
            ("PLDP", json!(self.depth)),
            ("PLWT", json!(self.weight)),
            ("PAGE", json!(MISSING)),
            ("PENV", json!(MISSING)),
            ("PLPH", json!(MISSING)),
            ("SPRL", json!(MISSING)),
        ])
    }
}

/// Jan 1 of `year` plus the pixel's start-of-season offset, which may be
/// negative.
pub fn planting_date(year: i32, sos_days: i32) -> Result<NaiveDate> {
    let offset = Days::new(sos_days.unsigned_abs().into());
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|jan1| {
            if sos_days >= 0 {
                jan1.checked_add_days(offset)
            } else {
                jan1.checked_sub_days(offset)
            }
        })
        .ok_or(EnsembleError::InvalidYear(year))
}

// ── Treatment ────────────────────────────────────────────────────────────────

/// Everything the engine needs for one ensemble member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Treatment {
    pub soil: PathBuf,
    pub weather: PathBuf,
    pub fertilizer: FertilizerSchedule,
    pub planting: PlantingSpec,
    pub cultivar: String,
}

/// Builds treatments for one run. The per-application nitrogen amount is fixed
/// at construction, so every member of the run shares it.
#[derive(Debug, Clone)]
pub struct TreatmentBuilder<'a> {
    config: &'a EnsembleConfig,
    layout: InputLayout,
    year: i32,
    amount_per_app: f64,
}

impl<'a> TreatmentBuilder<'a> {
    pub fn new(config: &'a EnsembleConfig, layout: InputLayout, year: i32, nitrogen_rate: f64) -> Self {
        let amount_per_app = if config.n_fert_apps == 0 {
            0.0
        } else {
            nitrogen_rate * config.n_ratio / config.n_fert_apps as f64
        };
        Self { config, layout, year, amount_per_app }
    }

    pub fn amount_per_application(&self) -> f64 {
        self.amount_per_app
    }

    pub fn build(&self, member: &EnsembleMember<'_>) -> Result<Treatment> {
        let cultivar = member.cultivar;
        let interval = fertilization_interval(
            &cultivar.id,
            cultivar.los,
            self.config.fert_window,
            self.config.n_fert_apps,
        )?;
        let fertilizer = FertilizerSchedule::split(self.config.n_fert_apps, interval, self.amount_per_app);
        let planting = PlantingSpec::on(planting_date(self.year, member.weather.sos_days)?);

        Ok(Treatment {
            soil: self.layout.soil_path(member.soil.location),
            weather: self.layout.weather_path(member.weather.location, self.year),
            fertilizer,
            planting,
            cultivar: cultivar.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::LatLon;
    use crate::tables::{CultivarRecord, PixelRecord};
    use approx::assert_relative_eq;

    fn cultivar(los: f64) -> CultivarRecord {
        CultivarRecord { id: "SC403".into(), los }
    }

    fn pixel(lat: f64, lon: f64, sos_days: i32) -> PixelRecord {
        PixelRecord { location: LatLon::new(lat, lon), sos_days }
    }

    #[test]
    fn schedule_splits_rate_evenly_over_seventy_percent_of_season() {
        let cfg = EnsembleConfig::default();
        let (cv, px) = (cultivar(120.0), pixel(-20.25, 30.75, 320));
        let member = EnsembleMember { cultivar: &cv, weather: &px, soil: &px };
        let t = TreatmentBuilder::new(&cfg, InputLayout::new("in"), 2020, 60.0).build(&member).unwrap();

        let events = t.fertilizer.events();
        assert_eq!(events.len(), 10);
        // floor(0.7 * 120 / 10) = 8
        let days: Vec<u32> = events.iter().map(|e| e.day).collect();
        assert_eq!(days, vec![0, 8, 16, 24, 32, 40, 48, 56, 64, 72]);
        assert!(events.iter().all(|e| (e.amount - 6.0).abs() < 1e-12));
        assert_relative_eq!(t.fertilizer.total(), 60.0, epsilon = 1e-9);
    }

    #[test]
    fn total_applied_honours_nitrogen_ratio() {
        let cfg = EnsembleConfig { n_ratio: 0.46, ..EnsembleConfig::default() };
        let builder = TreatmentBuilder::new(&cfg, InputLayout::new("in"), 2020, 75.0);
        for los in [95.0, 118.0, 140.5] {
            let (cv, px) = (cultivar(los), pixel(-19.0, 29.0, 300));
            let t = builder.build(&EnsembleMember { cultivar: &cv, weather: &px, soil: &px }).unwrap();
            assert_relative_eq!(t.fertilizer.total(), 75.0 * 0.46, epsilon = 1e-9);
            let days: Vec<u32> = t.fertilizer.events().iter().map(|e| e.day).collect();
            assert_eq!(days[0], 0);
            assert!(days.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn zero_rate_gives_zero_amounts() {
        let cfg = EnsembleConfig::default();
        let builder = TreatmentBuilder::new(&cfg, InputLayout::new("in"), 2020, 0.0);
        for los in [60.0, 150.0] {
            let (cv, px) = (cultivar(los), pixel(-19.0, 29.0, 300));
            let t = builder.build(&EnsembleMember { cultivar: &cv, weather: &px, soil: &px }).unwrap();
            assert!(t.fertilizer.events().iter().all(|e| e.amount == 0.0));
        }
    }

    #[test]
    fn planting_date_depends_only_on_weather_pixel_and_year() {
        let cfg = EnsembleConfig::default();
        let builder = TreatmentBuilder::new(&cfg, InputLayout::new("in"), 2020, 30.0);
        let weather = pixel(-20.25, 30.75, 320);
        let soil_a = pixel(-20.5, 30.5, 10);
        let soil_b = pixel(-20.0, 31.0, 200);
        let (cv_a, cv_b) = (cultivar(100.0), cultivar(140.0));

        let a = builder.build(&EnsembleMember { cultivar: &cv_a, weather: &weather, soil: &soil_a }).unwrap();
        let b = builder.build(&EnsembleMember { cultivar: &cv_b, weather: &weather, soil: &soil_b }).unwrap();

        // 2020 is a leap year: Jan 1 + 320 days = Nov 16.
        let expected = NaiveDate::from_ymd_opt(2020, 11, 16).unwrap();
        assert_eq!(a.planting.date, expected);
        assert_eq!(b.planting.date, expected);
    }

    #[test]
    fn negative_offset_plants_in_previous_year() {
        assert_eq!(planting_date(2020, -3).unwrap(), NaiveDate::from_ymd_opt(2019, 12, 29).unwrap());
        assert_eq!(planting_date(2020, 0).unwrap(), NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    }

    #[test]
    fn soil_and_weather_paths_follow_their_own_pixels() {
        let cfg = EnsembleConfig::default();
        let builder = TreatmentBuilder::new(&cfg, InputLayout::new("root"), 2020, 0.0);
        let (cv, weather, soil) = (cultivar(120.0), pixel(-20.25, 30.75, 320), pixel(-20.5, 30.5, 300));
        let t = builder.build(&EnsembleMember { cultivar: &cv, weather: &weather, soil: &soil }).unwrap();

        assert_eq!(t.soil, PathBuf::from("root/Soil/-020p50_0030p50.SOL"));
        assert_eq!(t.weather, PathBuf::from("root/Weather/-020p25_0030p75_2001.WTH"));
        assert_eq!(t.cultivar, "SC403");
    }

    #[test]
    fn degenerate_season_length_is_rejected() {
        for los in [0.0, -30.0, 10.0, f64::NAN] {
            let err = fertilization_interval("X", los, 0.7, 10).unwrap_err();
            assert!(matches!(err, EnsembleError::InvalidSeasonLength { .. }), "los = {los}");
        }
        // Shortest season with a one-day interval.
        assert_eq!(fertilization_interval("X", 15.0, 0.7, 10).unwrap(), 1);
    }

    #[test]
    fn planting_options_use_engine_codes_and_sentinels() {
        let spec = PlantingSpec::on(NaiveDate::from_ymd_opt(2020, 11, 16).unwrap());
        let opts = spec.to_options();
        assert_eq!(opts["PDATE"], json!("2020-11-16"));
        assert_eq!(opts["PPOP"], json!(4.5));
        assert_eq!(opts["PLRS"], json!(90.0));
        assert_eq!(opts["PLDS"], json!("R"));
        assert_eq!(opts["PLME"], json!("S"));
        assert_eq!(opts["PLDP"], json!(3.0));
        for key in ["EDATE", "PAGE", "PENV", "PLPH", "SPRL"] {
            assert_eq!(opts[key], json!(MISSING), "{key}");
        }
        assert_eq!(opts.len(), 14);
    }
}
