//! PID controller over measured throughput.
//!
//! The controller itself holds only gains and the anti-windup clamp. All
//! memory between ticks lives in [`ControllerState`], which the caller
//! threads through [`PidController::step`]. The same inputs always give
//! the same output.

use std::time::Duration;

use loadgrid_core::{ConfigError, LoadTarget};

/// Controller memory carried from one tick to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    integral: f64,
    previous_error: f64,
    last_tick_time: Duration,
}

impl ControllerState {
    /// Zero integral and error, clock at the start of the run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated error-seconds, always within the integral clamp.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn previous_error(&self) -> f64 {
        self.previous_error
    }

    /// Controller time since the run started. Advances by `dt` per step.
    pub fn last_tick_time(&self) -> Duration {
        self.last_tick_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    integral_low: f64,
    integral_high: f64,
}

impl PidController {
    /// Build a controller. Gains must be finite and the clamp ordered.
    pub fn new(kp: f64, ki: f64, kd: f64, integral_clamp: (f64, f64)) -> Result<Self, ConfigError> {
        for (name, value) in [("kp", kp), ("ki", ki), ("kd", kd)] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteGain { name, value });
            }
        }
        let (low, high) = integral_clamp;
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(ConfigError::InvalidIntegralClamp { low, high });
        }
        Ok(Self {
            kp,
            ki,
            kd,
            integral_low: low,
            integral_high: high,
        })
    }

    pub fn from_target(target: &LoadTarget) -> Result<Self, ConfigError> {
        Self::new(target.kp, target.ki, target.kd, target.integral_clamp)
    }

    /// Advance the controller by one tick.
    ///
    /// Returns the raw output (a worker delta before rounding) and the
    /// state to use on the next tick. `state` is left untouched.
    pub fn step(
        &self,
        target_rps: f64,
        measured_rps: f64,
        dt: Duration,
        state: &ControllerState,
    ) -> Result<(f64, ControllerState), ConfigError> {
        if dt.is_zero() {
            return Err(ConfigError::NonPositiveDt);
        }
        let dt_secs = dt.as_secs_f64();

        let error = target_rps - measured_rps;
        let integral = (state.integral + error * dt_secs).clamp(self.integral_low, self.integral_high);
        let derivative = (error - state.previous_error) / dt_secs;
        let output = self.kp * error + self.ki * integral + self.kd * derivative;

        let next = ControllerState {
            integral,
            previous_error: error,
            last_tick_time: state.last_tick_time + dt,
        };
        Ok((output, next))
    }
}
