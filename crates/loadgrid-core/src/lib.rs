//! loadgrid-core — shared vocabulary for the loadgrid workspace.
//!
//! Everything the control loop, the samplers, and the engines agree on
//! lives here: telemetry samples, the engine contract, the error
//! taxonomy, and the validated run configuration.
//!
//! # Layout
//!
//! ```text
//! types     Sample, ControlCommand, TickRecord, EngineStats, EngineState
//! engine    LoadEngine trait (start / stop / state / stats / workers)
//! error     ConfigError, SamplingError, ActuationError, EngineError, LoopError
//! config    LoadgridConfig (TOML file) → LoadTarget (validated)
//! duration  "500ms" / "1s" / "5m" parsing
//! ```

pub mod config;
pub mod duration;
pub mod engine;
pub mod error;
pub mod types;

pub use config::{ConfigWarning, LoadTarget, LoadgridConfig, WorkloadConfig};
pub use duration::parse_duration;
pub use engine::LoadEngine;
pub use error::*;
pub use types::*;
