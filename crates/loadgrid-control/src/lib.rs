//! loadgrid-control — closed-loop concurrency control.
//!
//! Drives a load-generation engine toward a target throughput by
//! adjusting its worker count once per tick.
//!
//! # Architecture
//!
//! ```text
//! ControlLoop  (Init → Running → Stopping → Stopped)
//!   └── every sample_interval:
//!       MetricsSampler::pull()          → Sample
//!       MovingAverage (optional)        → filtered rps
//!       PidController::step()           → output, ControllerState
//!       WorkerPoolActuator::apply()     → LoadEngine::start(desired, rate)
//!       mpsc::Sender<TickRecord>        → Recorder
//! ```
//!
//! The controller and actuator are plain values owned by the loop task;
//! nothing else can reach them while a run is in progress.

pub mod actuator;
pub mod control_loop;
pub mod pid;

pub use actuator::{ActuationOutcome, WorkerPoolActuator};
pub use control_loop::{ControlLoop, LoopPhase, RunReport, StopReason};
pub use pid::{ControllerState, PidController};
