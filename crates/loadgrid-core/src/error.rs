//! Error taxonomy for loadgrid.
//!
//! Only [`LoopError`] ever leaves the control loop. The other kinds are
//! either fatal before the loop starts ([`ConfigError`]) or absorbed per
//! tick ([`SamplingError`], [`ActuationError`]).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{EngineState, Sample};

/// Invalid configuration. Fatal: the loop never enters `Running`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("target_rps must be a finite value > 0, got {0}")]
    InvalidTarget(f64),

    #[error("min_workers must be >= 1")]
    ZeroMinWorkers,

    #[error("max_workers ({max}) must be >= min_workers ({min})")]
    InvalidWorkerBounds { min: u32, max: u32 },

    #[error("initial_workers ({initial}) must lie within [{min}, {max}]")]
    InitialOutOfBounds { initial: u32, min: u32, max: u32 },

    #[error("gain {name} must be finite, got {value}")]
    NonFiniteGain { name: &'static str, value: f64 },

    #[error("integral_clamp must be finite with low <= high, got ({low}, {high})")]
    InvalidIntegralClamp { low: f64, high: f64 },

    #[error("{0} must be > 0")]
    NonPositiveDuration(&'static str),

    #[error("{name} must be at most {max:?}")]
    DurationTooLong { name: &'static str, max: Duration },

    #[error("{0} must be >= 1")]
    ZeroCount(&'static str),

    #[error("controller dt must be > 0")]
    NonPositiveDt,

    #[error("invalid duration '{0}'")]
    Duration(String),

    #[error("invalid workload: {0}")]
    Workload(String),

    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Errors reported by a load-generation engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine is {0}")]
    NotReady(EngineState),

    #[error("telemetry unavailable: {0}")]
    Telemetry(String),

    #[error("scale command rejected: {0}")]
    Rejected(String),

    #[error("engine internal error: {0}")]
    Internal(String),
}

/// Telemetry could not be read for one tick. The tick is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SamplingError {
    #[error("engine not running (state: {0})")]
    EngineNotRunning(EngineState),

    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),

    #[error("invalid telemetry: {0}")]
    InvalidTelemetry(String),
}

impl From<EngineError> for SamplingError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotReady(state) => SamplingError::EngineNotRunning(state),
            other => SamplingError::TelemetryUnavailable(other.to_string()),
        }
    }
}

/// The engine refused a scale command. Logged and retried next tick.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("engine rejected scale to {desired} workers: {source}")]
pub struct ActuationError {
    pub desired: u32,
    #[source]
    pub source: EngineError,
}

/// Where the run was when it failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunContext {
    /// Index of the last tick attempted (0 if none ran).
    pub tick: u64,
    /// Last worker count applied to, or observed on, the engine.
    pub last_workers: u32,
    /// Last sample successfully pulled.
    pub last_sample: Option<Sample>,
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick={} workers={}", self.tick, self.last_workers)?;
        match &self.last_sample {
            Some(s) => write!(
                f,
                " last_rps={:.2} last_latency_ms={:.2}",
                s.measured_rps(),
                s.avg_latency()
            ),
            None => write!(f, " last_sample=none"),
        }
    }
}

/// Terminal failure of a control loop run.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine failed to start: {0}")]
    Startup(#[source] ActuationError),

    #[error("{failures} consecutive sampling failures, engine presumed dead ({context}): {last}")]
    SamplingExhausted {
        failures: u32,
        last: SamplingError,
        context: RunContext,
    },

    #[error("engine did not stop within {grace:?} ({context})")]
    ShutdownTimeout { grace: Duration, context: RunContext },
}

impl LoopError {
    /// Diagnostics for failures raised after the loop started.
    pub fn context(&self) -> Option<&RunContext> {
        match self {
            LoopError::SamplingExhausted { context, .. } => Some(context),
            LoopError::ShutdownTimeout { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_not_ready_maps_to_not_running() {
        let err: SamplingError = EngineError::NotReady(EngineState::Stopped).into();
        assert_eq!(err, SamplingError::EngineNotRunning(EngineState::Stopped));
    }

    #[test]
    fn other_engine_errors_map_to_unavailable() {
        let err: SamplingError = EngineError::Telemetry("stats lock poisoned".into()).into();
        assert!(matches!(err, SamplingError::TelemetryUnavailable(_)));
    }

    #[test]
    fn terminal_error_carries_context() {
        let err = LoopError::ShutdownTimeout {
            grace: Duration::from_secs(2),
            context: RunContext {
                tick: 17,
                last_workers: 42,
                last_sample: Some(Sample::new(0, 39.5, 20.0, 42)),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("tick=17"));
        assert!(msg.contains("workers=42"));
        assert!(msg.contains("last_rps=39.50"));
        assert_eq!(err.context().map(|c| c.tick), Some(17));
    }
}
