//! Worker-pool actuator: turns controller output into scale commands.

use std::sync::Arc;

use tracing::{debug, warn};

use loadgrid_core::{ActuationError, ControlCommand, LoadEngine, LoadTarget};

/// What one call to [`WorkerPoolActuator::apply`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum ActuationOutcome {
    /// No engine call was needed.
    Unchanged { workers: u32 },
    /// The engine accepted the command.
    Applied(ControlCommand),
    /// The engine refused the command. It will be re-issued on the next
    /// tick that computes the same count.
    Failed {
        command: ControlCommand,
        error: ActuationError,
    },
}

impl ActuationOutcome {
    /// The worker count this tick settled on.
    pub fn desired_workers(&self) -> u32 {
        match self {
            ActuationOutcome::Unchanged { workers } => *workers,
            ActuationOutcome::Applied(cmd) => cmd.desired_workers,
            ActuationOutcome::Failed { command, .. } => command.desired_workers,
        }
    }
}

/// Clamps worker deltas to the configured bounds and suppresses
/// redundant engine calls.
pub struct WorkerPoolActuator {
    engine: Arc<dyn LoadEngine>,
    min_workers: u32,
    max_workers: u32,
    /// Fixed quantum replacing every non-zero delta.
    step_size: Option<u32>,
    last_applied: Option<u32>,
}

impl WorkerPoolActuator {
    pub fn new(
        engine: Arc<dyn LoadEngine>,
        min_workers: u32,
        max_workers: u32,
        step_size: Option<u32>,
    ) -> Self {
        Self {
            engine,
            min_workers,
            max_workers: max_workers.max(min_workers),
            step_size,
            last_applied: None,
        }
    }

    pub fn from_target(engine: Arc<dyn LoadEngine>, target: &LoadTarget) -> Self {
        Self::new(engine, target.min_workers, target.max_workers, target.step_size)
    }

    /// Last count the engine accepted.
    pub fn last_applied(&self) -> Option<u32> {
        self.last_applied
    }

    /// Note a count the engine is known to be running at.
    pub fn record_applied(&mut self, workers: u32) {
        self.last_applied = Some(workers);
    }

    /// `clamp(current + round(output), min, max)`, or a fixed step in
    /// the direction of `round(output)` when a step size is set.
    pub fn desired_workers(&self, output: f64, current_workers: u32) -> u32 {
        let rounded = if output.is_finite() { output.round() } else { 0.0 };
        let mut delta = rounded.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        if let Some(step) = self.step_size {
            delta = delta.signum() * i64::from(step);
        }
        let desired = i64::from(current_workers).saturating_add(delta);
        desired.clamp(i64::from(self.min_workers), i64::from(self.max_workers)) as u32
    }

    /// Start the engine at `workers`. Used once, before the first tick.
    pub fn start(&mut self, workers: u32) -> Result<ControlCommand, ActuationError> {
        let command = ControlCommand::jump_to(workers);
        self.issue(command)?;
        Ok(command)
    }

    /// Act on one tick's controller output.
    pub fn apply(&mut self, output: f64, current_workers: u32) -> ActuationOutcome {
        let desired = self.desired_workers(output, current_workers);

        if desired == current_workers || self.last_applied == Some(desired) {
            return ActuationOutcome::Unchanged { workers: desired };
        }

        let command = ControlCommand::jump_to(desired);
        match self.issue(command) {
            Ok(()) => {
                debug!(from = current_workers, to = desired, output, "scaled engine");
                ActuationOutcome::Applied(command)
            }
            Err(error) => {
                warn!(
                    current = current_workers,
                    desired,
                    error = %error,
                    "scale command rejected, will retry next tick"
                );
                ActuationOutcome::Failed { command, error }
            }
        }
    }

    fn issue(&mut self, command: ControlCommand) -> Result<(), ActuationError> {
        self.engine
            .start(command.desired_workers, command.spawn_rate)
            .map_err(|source| ActuationError {
                desired: command.desired_workers,
                source,
            })?;
        self.last_applied = Some(command.desired_workers);
        Ok(())
    }
}
