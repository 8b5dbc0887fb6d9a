//! Engine adapter that delegates each batch to an external program.
//!
//! The batch is written to the program's stdin as one JSON document and the
//! program must print `{"rows": [...], "overview": ...}` on stdout. A non-zero
//! exit status or unreadable output is an engine error. A program that exits
//! without reading all of its input is judged by its exit status and output
//! alone.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use ensemble_core::engine::{EngineOutput, EngineSession, SimControls, SimulationEngine, SimulationWindow};
use ensemble_core::treatment::Treatment;
use ensemble_core::EngineError;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl SimulationEngine for CommandEngine {
    type Session = CommandSession;

    fn open_session(&self, crop: &str) -> Result<CommandSession, EngineError> {
        Ok(CommandSession { engine: self.clone(), crop: crop.to_string(), treatments: Vec::new() })
    }
}

pub struct CommandSession {
    engine: CommandEngine,
    crop: String,
    treatments: Vec<WireTreatment>,
}

/// Treatment in the shape the engine's `add_treatment` expects.
#[derive(Debug, Serialize)]
struct WireTreatment {
    soil: PathBuf,
    weather: PathBuf,
    /// `(day, amount)` pairs.
    nitrogen: Vec<(u32, f64)>,
    planting: BTreeMap<&'static str, Value>,
    cultivar: String,
}

#[derive(Serialize)]
struct Batch<'a> {
    crop: &'a str,
    start_date: chrono::NaiveDate,
    latest_date: chrono::NaiveDate,
    sim_controls: &'a SimControls,
    treatments: &'a [WireTreatment],
}

impl EngineSession for CommandSession {
    fn add_treatment(&mut self, treatment: &Treatment) -> Result<(), EngineError> {
        self.treatments.push(WireTreatment {
            soil: treatment.soil.clone(),
            weather: treatment.weather.clone(),
            nitrogen: treatment.fertilizer.events().iter().map(|e| (e.day, e.amount)).collect(),
            planting: treatment.planting.to_options(),
            cultivar: treatment.cultivar.clone(),
        });
        Ok(())
    }

    fn run(&mut self, window: &SimulationWindow, controls: &SimControls) -> Result<EngineOutput, EngineError> {
        let batch = Batch {
            crop: &self.crop,
            start_date: window.start,
            latest_date: window.horizon,
            sim_controls: controls,
            treatments: &self.treatments,
        };
        let input = serde_json::to_vec(&batch).map_err(EngineError::new)?;

        info!(
            program = %self.engine.program.display(),
            treatments = self.treatments.len(),
            "running external engine"
        );
        let mut child = Command::new(&self.engine.program)
            .args(&self.engine.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(EngineError::new)?;

        // Feed stdin from another thread so a chatty engine cannot block on stdout.
        let writer = child.stdin.take().map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(&input))
        });
        let output = child.wait_with_output().map_err(EngineError::new)?;
        let written = match writer {
            Some(handle) => handle.join().map_err(|_| EngineError::msg("engine stdin writer panicked"))?,
            None => Ok(()),
        };

        if !output.status.success() {
            return Err(EngineError::msg(format!(
                "engine {} exited with {}",
                self.engine.program.display(),
                output.status
            )));
        }
        match written {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!("engine closed stdin before reading the whole batch");
            }
            other => other.map_err(EngineError::new)?,
        }
        debug!(bytes = output.stdout.len(), "engine output received");
        serde_json::from_slice(&output.stdout).map_err(EngineError::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ensemble_core::treatment::{FertilizerSchedule, PlantingSpec};

    fn window() -> SimulationWindow {
        SimulationWindow {
            start: NaiveDate::from_ymd_opt(2020, 8, 10).unwrap(),
            horizon: NaiveDate::from_ymd_opt(2021, 11, 11).unwrap(),
        }
    }

    fn treatment() -> Treatment {
        Treatment {
            soil: PathBuf::from("/in/Soil/-020p25_0030p75.SOL"),
            weather: PathBuf::from("/in/Weather/-020p25_0030p75_2001.WTH"),
            fertilizer: FertilizerSchedule::split(10, 8, 6.0),
            planting: PlantingSpec::on(NaiveDate::from_ymd_opt(2020, 11, 16).unwrap()),
            cultivar: "SC403".into(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn parses_engine_stdout() {
        let script = r#"cat > /dev/null; echo '{"rows": [{"HWAM": 3120}], "overview": "ok"}'"#;
        let engine = CommandEngine::new("sh", vec!["-c".into(), script.into()]);
        let mut session = engine.open_session("Maize").unwrap();
        session.add_treatment(&treatment()).unwrap();

        let out = session.run(&window(), &SimControls::new()).unwrap();

        assert_eq!(out.rows.len(), 1);
        assert_eq!(out.rows[0]["HWAM"], serde_json::json!(3120));
        assert_eq!(out.overview, serde_json::json!("ok"));
    }

    #[cfg(unix)]
    #[test]
    fn engine_receives_batch_on_stdin() {
        // Echo the batch's treatment count and first planting date back as a row.
        let script = r#"read -r batch; case "$batch" in *'"PDATE":"2020-11-16"'*) d=yes;; *) d=no;; esac; echo "{\"rows\": [{\"seen\": \"$d\"}]}""#;
        let engine = CommandEngine::new("sh", vec!["-c".into(), script.into()]);
        let mut session = engine.open_session("Maize").unwrap();
        session.add_treatment(&treatment()).unwrap();

        let out = session.run(&window(), &SimControls::new()).unwrap();

        assert_eq!(out.rows[0]["seen"], serde_json::json!("yes"));
        assert_eq!(out.overview, Value::Null);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_an_engine_error() {
        let engine = CommandEngine::new("sh", vec!["-c".into(), "cat > /dev/null; exit 3".into()]);
        let mut session = engine.open_session("Maize").unwrap();
        session.add_treatment(&treatment()).unwrap();

        let err = session.run(&window(), &SimControls::new()).unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    /// A batch large enough to overflow the pipe buffer.
    fn large_session(engine: &CommandEngine) -> CommandSession {
        let mut session = engine.open_session("Maize").unwrap();
        for _ in 0..2000 {
            session.add_treatment(&treatment()).unwrap();
        }
        session
    }

    #[cfg(unix)]
    #[test]
    fn engine_that_ignores_stdin_still_succeeds() {
        let script = r#"exec 0<&-; echo '{"rows": []}'"#;
        let engine = CommandEngine::new("sh", vec!["-c".into(), script.into()]);
        let mut session = large_session(&engine);

        let out = session.run(&window(), &SimControls::new()).unwrap();

        assert!(out.rows.is_empty());
        assert_eq!(out.overview, Value::Null);
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_wins_over_closed_stdin() {
        let engine = CommandEngine::new("sh", vec!["-c".into(), "exec 0<&-; exit 3".into()]);
        let mut session = large_session(&engine);

        let err = session.run(&window(), &SimControls::new()).unwrap_err();
        assert!(err.to_string().contains("exited with"), "{err}");
    }

    #[test]
    fn missing_program_is_an_engine_error() {
        let engine = CommandEngine::new("/nonexistent/engine-binary", vec![]);
        let mut session = engine.open_session("Maize").unwrap();
        assert!(session.run(&window(), &SimControls::new()).is_err());
    }
}
