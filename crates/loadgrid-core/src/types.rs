//! Domain types shared by the sampler, controller, actuator, and sinks.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Telemetry ──────────────────────────────────────────────────────

/// One telemetry snapshot, produced once per tick by the sampler.
///
/// Fields are private so a sample cannot be altered after it is taken.
/// Deserializing goes through [`Sample::new`] and applies the same floor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "SampleFields")]
pub struct Sample {
    /// Unix timestamp (milliseconds) at which the sample was taken.
    timestamp: u64,
    /// Requests completed per second.
    measured_rps: f64,
    /// Average response time in milliseconds.
    avg_latency: f64,
    /// Workers the engine reports as active.
    active_workers: u32,
}

impl Sample {
    /// Build a sample. Negative or non-finite readings are floored to zero.
    pub fn new(timestamp: u64, measured_rps: f64, avg_latency: f64, active_workers: u32) -> Self {
        Self {
            timestamp,
            measured_rps: non_negative(measured_rps),
            avg_latency: non_negative(avg_latency),
            active_workers,
        }
    }

    /// Build a sample stamped with the current wall-clock time.
    pub fn now(measured_rps: f64, avg_latency: f64, active_workers: u32) -> Self {
        Self::new(epoch_millis(), measured_rps, avg_latency, active_workers)
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn measured_rps(&self) -> f64 {
        self.measured_rps
    }

    pub fn avg_latency(&self) -> f64 {
        self.avg_latency
    }

    pub fn active_workers(&self) -> u32 {
        self.active_workers
    }
}

/// Wire form of [`Sample`].
#[derive(Deserialize)]
struct SampleFields {
    timestamp: u64,
    measured_rps: f64,
    avg_latency: f64,
    active_workers: u32,
}

impl From<SampleFields> for Sample {
    fn from(f: SampleFields) -> Self {
        Sample::new(f.timestamp, f.measured_rps, f.avg_latency, f.active_workers)
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

// ── Actuation ──────────────────────────────────────────────────────

/// A scale command derived from one tick's controller output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    /// Worker count the engine should converge to.
    pub desired_workers: u32,
    /// Workers per second the engine may spawn to get there.
    pub spawn_rate: f64,
}

impl ControlCommand {
    /// Jump straight to `desired` workers (spawn rate equals the count).
    pub fn jump_to(desired: u32) -> Self {
        Self {
            desired_workers: desired,
            spawn_rate: desired as f64,
        }
    }
}

// ── Sink ───────────────────────────────────────────────────────────

/// What the control loop emits to its sink once per completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickRecord {
    /// 1-based tick index within the run.
    pub tick: u64,
    pub sample: Sample,
    /// Worker count the loop settled on for this tick.
    pub desired_workers: u32,
    /// Throughput fed to the controller (equals `sample.measured_rps`
    /// unless smoothing is configured).
    pub filtered_rps: f64,
    /// Raw controller output.
    pub output: f64,
}

// ── Engine ─────────────────────────────────────────────────────────

/// Aggregate statistics exposed by a load-generation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Requests per second over the engine's recent window.
    pub current_rps: f64,
    /// Mean response time in milliseconds.
    pub avg_response_time: f64,
    /// Requests completed since the engine started.
    pub total_requests: u64,
    /// Requests that failed since the engine started.
    pub total_failures: u64,
}

/// Lifecycle state of a load-generation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Created but never started.
    Ready,
    /// Moving toward a new worker count.
    Spawning,
    /// At its requested worker count.
    Running,
    /// Stop requested, workers still draining.
    Stopping,
    /// All workers gone.
    Stopped,
}

impl EngineState {
    /// Whether telemetry read in this state reflects live traffic.
    pub fn is_running(self) -> bool {
        matches!(self, EngineState::Spawning | EngineState::Running)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Ready => "ready",
            EngineState::Spawning => "spawning",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
            EngineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
