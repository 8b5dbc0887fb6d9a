//! District ensemble orchestrator: runs all stages of one district run in order.
//!
//! Stages:
//!   1. Resolve the district in both reference tables
//!   2. Sample members
//!   3. Build treatments (member order is preserved)
//!   4. Submit to a fresh engine session
//!   5. Run the batch over one shared window
//!   6. Attach member metadata to the returned rows
//!
//! Stages 1-3 never touch the engine, so their failures leave no partial
//! submission behind.

use chrono::{Days, NaiveDate};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::EnsembleConfig;
use crate::coords::LatLon;
use crate::engine::{EngineSession, OutcomeRow, SimControls, SimulationEngine, SimulationWindow};
use crate::error::{EnsembleError, Result};
use crate::layout::InputLayout;
use crate::sampler::sample_members;
use crate::tables::ReferenceTables;
use crate::treatment::TreatmentBuilder;

// ── Request ──────────────────────────────────────────────────────────────────

/// Arguments of one district run. Nitrogen rate defaults to 0 and the
/// simulation options to an empty map owned by this request.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub district: String,
    pub year: i32,
    /// Total seasonal nitrogen, kg/ha.
    pub nitrogen_rate: f64,
    pub controls: SimControls,
}

impl RunRequest {
    pub fn new(district: impl Into<String>, year: i32) -> Self {
        Self {
            district: district.into(),
            year,
            nitrogen_rate: 0.0,
            controls: SimControls::new(),
        }
    }

    pub fn nitrogen_rate(mut self, rate: f64) -> Self {
        self.nitrogen_rate = rate;
        self
    }

    pub fn controls(mut self, controls: SimControls) -> Self {
        self.controls = controls;
        self
    }
}

// ── Output ───────────────────────────────────────────────────────────────────

/// Columns the runner attaches to each engine row. An engine column with the
/// same name is replaced.
pub const MEMBER_COLUMNS: [&str; 4] = ["weather_pixel", "soil_pixel", "cultivar", "planting"];

/// One engine row plus the identity of the member that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberResult {
    #[serde(flatten)]
    pub outcome: OutcomeRow,
    pub weather_pixel: LatLon,
    pub soil_pixel: LatLon,
    pub cultivar: String,
    pub planting: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnsembleRun {
    pub rows: Vec<MemberResult>,
    /// Engine overview, as returned.
    pub overview: Value,
}

/// Per-member metadata kept in submission order.
struct MemberMeta {
    weather_pixel: LatLon,
    soil_pixel: LatLon,
    cultivar: String,
    planting: NaiveDate,
}

// ── Runner ───────────────────────────────────────────────────────────────────

/// Holds the read-only context shared by district runs.
pub struct EnsembleRunner<'a, E> {
    tables: &'a ReferenceTables,
    engine: &'a E,
    config: EnsembleConfig,
    layout: InputLayout,
}

impl<'a, E: SimulationEngine> EnsembleRunner<'a, E> {
    /// Input paths are resolved against `config.input_root` as given; pass an
    /// absolute root (the CLI joins it to the working directory).
    pub fn new(tables: &'a ReferenceTables, engine: &'a E, config: EnsembleConfig) -> Self {
        let layout = InputLayout::new(config.input_root.clone());
        Self { tables, engine, config, layout }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Run with the thread-local random source.
    pub fn run_district(&self, request: &RunRequest) -> Result<EnsembleRun> {
        self.run_district_with_rng(&mut rand::thread_rng(), request)
    }

    pub fn run_district_with_rng<R: Rng + ?Sized>(&self, rng: &mut R, request: &RunRequest) -> Result<EnsembleRun> {
        let RunRequest { district, year, nitrogen_rate, controls } = request;
        let (year, nitrogen_rate) = (*year, *nitrogen_rate);
        if !nitrogen_rate.is_finite() || nitrogen_rate < 0.0 {
            return Err(EnsembleError::InvalidNitrogenRate(nitrogen_rate));
        }

        info!(
            district = %district,
            year,
            nitrogen_rate,
            members = self.config.ensemble_size,
            "starting district ensemble"
        );

        // ── 1. Reference tables ─────────────────────────────────────────────
        let cultivars = self.tables.cultivars_for(district)?;
        let pixels = self.tables.pixels_for(district)?;

        // ── 2. Sampling ─────────────────────────────────────────────────────
        let members = sample_members(rng, district, cultivars, pixels, self.config.ensemble_size)?;

        // ── 3. Treatments ───────────────────────────────────────────────────
        let builder = TreatmentBuilder::new(&self.config, self.layout.clone(), year, nitrogen_rate);
        let mut treatments = Vec::with_capacity(members.len());
        let mut meta = Vec::with_capacity(members.len());
        for member in &members {
            let treatment = builder.build(member)?;
            meta.push(MemberMeta {
                weather_pixel: member.weather.location,
                soil_pixel: member.soil.location,
                cultivar: member.cultivar.id.clone(),
                planting: treatment.planting.date,
            });
            treatments.push(treatment);
        }
        let window = self.simulation_window(year, &meta)?;
        debug!(
            per_application = builder.amount_per_application(),
            start = %window.start,
            horizon = %window.horizon,
            "treatments built"
        );

        // ── 4. Submission ───────────────────────────────────────────────────
        let mut session = self.engine.open_session(&self.config.crop)?;
        for treatment in &treatments {
            session.add_treatment(treatment)?;
        }
        debug!(submitted = treatments.len(), crop = %self.config.crop, "treatments submitted");

        // ── 5. Batch run ────────────────────────────────────────────────────
        let output = session.run(&window, controls)?;

        // ── 6. Augmentation ─────────────────────────────────────────────────
        if output.rows.len() != meta.len() {
            return Err(EnsembleError::RowCountMismatch { expected: meta.len(), got: output.rows.len() });
        }
        let rows: Vec<MemberResult> = output
            .rows
            .into_iter()
            .zip(meta)
            .map(|(mut outcome, m)| {
                for column in MEMBER_COLUMNS {
                    outcome.remove(column);
                }
                MemberResult {
                    outcome,
                    weather_pixel: m.weather_pixel,
                    soil_pixel: m.soil_pixel,
                    cultivar: m.cultivar,
                    planting: m.planting,
                }
            })
            .collect();

        info!(district = %district, rows = rows.len(), "district ensemble complete");
        Ok(EnsembleRun { rows, overview: output.overview })
    }

    /// Fixed season start in `year`; horizon a fixed span past the latest planting.
    fn simulation_window(&self, year: i32, meta: &[MemberMeta]) -> Result<SimulationWindow> {
        let season = self.config.season_start;
        let start = match season.in_year(year) {
            Some(start) => start,
            None if NaiveDate::from_yo_opt(year, 1).is_none() => return Err(EnsembleError::InvalidYear(year)),
            None => return Err(EnsembleError::InvalidSeasonStart { month: season.month, day: season.day }),
        };
        let latest = meta.iter().map(|m| m.planting).max().unwrap_or(start);
        let horizon = latest
            .checked_add_days(Days::new(self.config.horizon_days))
            .ok_or(EnsembleError::InvalidYear(year))?;
        Ok(SimulationWindow { start, horizon })
    }
}
