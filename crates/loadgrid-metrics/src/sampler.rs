//! Metrics sampler. Pulls one [`Sample`] from the engine per tick.

use std::sync::Arc;

use tracing::trace;

use loadgrid_core::{LoadEngine, Sample, SamplingError};

/// Reads engine telemetry without touching engine state.
#[derive(Clone)]
pub struct MetricsSampler {
    engine: Arc<dyn LoadEngine>,
}

impl MetricsSampler {
    pub fn new(engine: Arc<dyn LoadEngine>) -> Self {
        Self { engine }
    }

    /// Take a sample.
    ///
    /// Fails when the engine is not running or any reading is unavailable
    /// or nonsensical (negative or non-finite).
    pub fn pull(&self) -> Result<Sample, SamplingError> {
        let state = self.engine.current_state();
        if !state.is_running() {
            return Err(SamplingError::EngineNotRunning(state));
        }

        let stats = self.engine.stats()?;
        let workers = self.engine.active_worker_count()?;

        if !stats.current_rps.is_finite() || stats.current_rps < 0.0 {
            return Err(SamplingError::InvalidTelemetry(format!(
                "current_rps = {}",
                stats.current_rps
            )));
        }
        if !stats.avg_response_time.is_finite() || stats.avg_response_time < 0.0 {
            return Err(SamplingError::InvalidTelemetry(format!(
                "avg_response_time = {}",
                stats.avg_response_time
            )));
        }

        let sample = Sample::now(stats.current_rps, stats.avg_response_time, workers);
        trace!(
            rps = sample.measured_rps(),
            latency_ms = sample.avg_latency(),
            workers,
            "sample pulled"
        );
        Ok(sample)
    }
}
