//! Monte Carlo ensemble construction for district-level crop simulations.
//!
//! A district run samples cultivar, weather and soil pixels from per-district
//! reference tables, assembles one treatment per member and hands the batch
//! to an external simulation engine through [`engine::SimulationEngine`].

pub mod config;
pub mod coords;
pub mod engine;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod sampler;
pub mod tables;
pub mod treatment;

pub use config::EnsembleConfig;
pub use error::{EngineError, EnsembleError, Result};
pub use orchestrator::{EnsembleRun, EnsembleRunner, MemberResult, RunRequest};
pub use tables::ReferenceTables;
