//! The load-generation engine contract.
//!
//! The control loop never talks to workers directly. It reads telemetry
//! and issues scale commands through this trait, which is implemented by
//! the in-process worker pool and by the simulated engine used in tests.

use crate::error::EngineError;
use crate::types::{EngineState, EngineStats};

/// Read/actuate interface of a load-generation engine.
///
/// Implementations are shared between the sampler and the actuator
/// (`Arc<dyn LoadEngine>`), so every method takes `&self`.
pub trait LoadEngine: Send + Sync {
    /// Start the engine, or rescale it, toward `worker_count` workers,
    /// spawning at most `spawn_rate` workers per second.
    ///
    /// Calling it again with the same count is harmless.
    fn start(&self, worker_count: u32, spawn_rate: f64) -> Result<(), EngineError>;

    /// Begin an orderly shutdown. Completion is observed via
    /// [`LoadEngine::current_state`].
    fn stop(&self) -> Result<(), EngineError>;

    /// Current lifecycle state.
    fn current_state(&self) -> EngineState;

    /// Aggregate throughput and latency statistics.
    fn stats(&self) -> Result<EngineStats, EngineError>;

    /// Number of workers currently alive.
    fn active_worker_count(&self) -> Result<u32, EngineError>;
}
