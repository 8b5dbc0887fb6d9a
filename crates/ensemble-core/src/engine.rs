//! Boundary to the external crop-simulation engine.
//!
//! The engine is a black box: a session is opened per crop, treatments are
//! registered one by one, then a single batch run returns one outcome row per
//! treatment (in submission order) plus an engine-defined overview.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::EngineError;
use crate::treatment::Treatment;

/// Simulation options forwarded to the engine untouched.
pub type SimControls = BTreeMap<String, Value>;

/// Engine outcome columns for one treatment.
pub type OutcomeRow = Map<String, Value>;

/// Shared simulation period for the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationWindow {
    pub start: NaiveDate,
    /// Latest date any member may still be simulating.
    pub horizon: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineOutput {
    pub rows: Vec<OutcomeRow>,
    #[serde(default)]
    pub overview: Value,
}

pub trait SimulationEngine {
    type Session: EngineSession;

    /// Open a fresh session for `crop`. Sessions are never reused across runs.
    fn open_session(&self, crop: &str) -> Result<Self::Session, EngineError>;
}

pub trait EngineSession {
    fn add_treatment(&mut self, treatment: &Treatment) -> Result<(), EngineError>;

    fn run(&mut self, window: &SimulationWindow, controls: &SimControls) -> Result<EngineOutput, EngineError>;
}

// ── Dry run ──────────────────────────────────────────────────────────────────

/// Batch as seen by the engine: what a dry run records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmittedBatch {
    pub crop: String,
    pub window: SimulationWindow,
    pub controls: SimControls,
    pub treatments: Vec<Treatment>,
}

/// In-process engine that runs nothing. Each run yields one row per treatment
/// describing its inputs, and the batch is kept for inspection.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    batches: Rc<RefCell<Vec<SubmittedBatch>>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<SubmittedBatch> {
        self.batches.borrow().clone()
    }
}

pub struct DryRunSession {
    batches: Rc<RefCell<Vec<SubmittedBatch>>>,
    crop: String,
    treatments: Vec<Treatment>,
}

impl SimulationEngine for DryRunEngine {
    type Session = DryRunSession;

    fn open_session(&self, crop: &str) -> Result<Self::Session, EngineError> {
        Ok(DryRunSession {
            batches: Rc::clone(&self.batches),
            crop: crop.to_string(),
            treatments: Vec::new(),
        })
    }
}

impl EngineSession for DryRunSession {
    fn add_treatment(&mut self, treatment: &Treatment) -> Result<(), EngineError> {
        self.treatments.push(treatment.clone());
        Ok(())
    }

    fn run(&mut self, window: &SimulationWindow, controls: &SimControls) -> Result<EngineOutput, EngineError> {
        let rows = self
            .treatments
            .iter()
            .enumerate()
            .map(|(i, t)| describe(i + 1, t))
            .collect();
        let overview = json!({
            "mode": "dry-run",
            "crop": self.crop,
            "treatments": self.treatments.len(),
        });

        self.batches.borrow_mut().push(SubmittedBatch {
            crop: self.crop.clone(),
            window: *window,
            controls: controls.clone(),
            treatments: std::mem::take(&mut self.treatments),
        });
        Ok(EngineOutput { rows, overview })
    }
}

fn describe(trno: usize, t: &Treatment) -> OutcomeRow {
    let file_name = |p: &std::path::Path| {
        p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    };
    let mut row = Map::new();
    row.insert("TRNO".into(), json!(trno));
    row.insert("SOIL".into(), json!(file_name(&t.soil)));
    row.insert("WTH".into(), json!(file_name(&t.weather)));
    row.insert("PDAT".into(), json!(t.planting.date));
    row.insert("NAPP".into(), json!(t.fertilizer.len()));
    row.insert("NTOT".into(), json!(t.fertilizer.total()));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::treatment::{FertilizerSchedule, PlantingSpec};
    use std::path::PathBuf;

    fn treatment(day: u32) -> Treatment {
        Treatment {
            soil: PathBuf::from("in/Soil/-020p25_0030p75.SOL"),
            weather: PathBuf::from("in/Weather/-020p25_0030p75_2001.WTH"),
            fertilizer: FertilizerSchedule::split(10, 8, 6.0),
            planting: PlantingSpec::on(NaiveDate::from_ymd_opt(2020, 11, day).unwrap()),
            cultivar: "SC403".into(),
        }
    }

    #[test]
    fn dry_run_returns_one_row_per_treatment_in_order() {
        let engine = DryRunEngine::new();
        let mut session = engine.open_session("Maize").unwrap();
        session.add_treatment(&treatment(10)).unwrap();
        session.add_treatment(&treatment(20)).unwrap();

        let window = SimulationWindow {
            start: NaiveDate::from_ymd_opt(2020, 8, 10).unwrap(),
            horizon: NaiveDate::from_ymd_opt(2021, 11, 15).unwrap(),
        };
        let out = session.run(&window, &SimControls::new()).unwrap();

        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0]["TRNO"], json!(1));
        assert_eq!(out.rows[1]["PDAT"], json!("2020-11-20"));
        assert_eq!(out.rows[0]["SOIL"], json!("-020p25_0030p75.SOL"));
        assert_eq!(out.rows[0]["NTOT"], json!(60.0));
        assert_eq!(out.overview["treatments"], json!(2));

        let batches = engine.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].crop, "Maize");
        assert_eq!(batches[0].window, window);
        assert_eq!(batches[0].treatments.len(), 2);
    }
}
