//! loadgrid.toml configuration parser and run-target validation.
//!
//! [`LoadgridConfig`] mirrors the file: every section except `[target]` is
//! optional and falls back to defaults. [`LoadgridConfig::to_target`]
//! resolves it into a [`LoadTarget`], which the control loop validates
//! once at startup and then treats as read-only.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{format_duration, parse_duration};
use crate::error::ConfigError;

pub const DEFAULT_KP: f64 = 0.1;
pub const DEFAULT_KI: f64 = 0.01;
pub const DEFAULT_KD: f64 = 0.05;
pub const DEFAULT_INTEGRAL_CLAMP: (f64, f64) = (-400.0, 400.0);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
pub const DEFAULT_STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_SAMPLING_FAILURES: u32 = 5;
/// Longest duration any timing field may hold.
pub const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ── File format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadgridConfig {
    pub target: TargetConfig,
    pub workers: Option<WorkersConfig>,
    pub pid: Option<PidConfig>,
    pub timing: Option<TimingConfig>,
    pub sampling: Option<SamplingConfig>,
    pub workload: Option<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub rps: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub min: Option<u32>,
    pub max: Option<u32>,
    pub initial: Option<u32>,
    /// Fixed-step quantum; see [`LoadTarget::step_size`].
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub integral_clamp: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    pub sample_interval: Option<String>,
    pub run_duration: Option<String>,
    pub shutdown_grace: Option<String>,
    pub stop_poll_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_consecutive_failures: Option<u32>,
    pub smoothing_window: Option<usize>,
}

/// Synthetic workload description, resolved by the engine crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// "constant", "uniform", or "flaky".
    pub kind: String,
    pub latency: Option<String>,
    pub min_latency: Option<String>,
    pub max_latency: Option<String>,
    pub failure_rate: Option<f64>,
    /// Per-worker think time between requests.
    pub wait_min: Option<String>,
    pub wait_max: Option<String>,
}

impl LoadgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config matching the classic setup: start at 50 users,
    /// never fewer than 10, steer toward 40 rps with 1-2 s think time.
    pub fn scaffold(target_rps: f64) -> Self {
        LoadgridConfig {
            target: TargetConfig { rps: target_rps },
            workers: Some(WorkersConfig {
                min: Some(10),
                max: Some(200),
                initial: Some(50),
                step: None,
            }),
            pid: Some(PidConfig {
                kp: Some(DEFAULT_KP),
                ki: Some(DEFAULT_KI),
                kd: Some(DEFAULT_KD),
                integral_clamp: Some([DEFAULT_INTEGRAL_CLAMP.0, DEFAULT_INTEGRAL_CLAMP.1]),
            }),
            timing: Some(TimingConfig {
                sample_interval: Some(format_duration(DEFAULT_SAMPLE_INTERVAL)),
                run_duration: Some(format_duration(DEFAULT_RUN_DURATION)),
                shutdown_grace: Some(format_duration(DEFAULT_SHUTDOWN_GRACE)),
                stop_poll_interval: Some(format_duration(DEFAULT_STOP_POLL_INTERVAL)),
            }),
            sampling: Some(SamplingConfig {
                max_consecutive_failures: Some(DEFAULT_MAX_SAMPLING_FAILURES),
                smoothing_window: None,
            }),
            workload: Some(WorkloadConfig {
                kind: "uniform".to_string(),
                latency: None,
                min_latency: Some("10ms".to_string()),
                max_latency: Some("50ms".to_string()),
                failure_rate: None,
                wait_min: Some("1s".to_string()),
                wait_max: Some("2s".to_string()),
            }),
        }
    }

    /// Resolve the file into a run target. Durations are parsed here;
    /// bounds are checked later by [`LoadTarget::validate`].
    pub fn to_target(&self) -> Result<LoadTarget, ConfigError> {
        let workers = self.workers.clone().unwrap_or_default();
        let pid = self.pid.clone().unwrap_or_default();
        let timing = self.timing.clone().unwrap_or_default();
        let sampling = self.sampling.clone().unwrap_or_default();

        let min_workers = workers.min.unwrap_or(1);
        let max_workers = workers.max.unwrap_or(min_workers.max(100));

        Ok(LoadTarget {
            target_rps: self.target.rps,
            min_workers,
            max_workers,
            initial_workers: workers.initial.unwrap_or(min_workers),
            kp: pid.kp.unwrap_or(DEFAULT_KP),
            ki: pid.ki.unwrap_or(DEFAULT_KI),
            kd: pid.kd.unwrap_or(DEFAULT_KD),
            integral_clamp: pid
                .integral_clamp
                .map(|[low, high]| (low, high))
                .unwrap_or(DEFAULT_INTEGRAL_CLAMP),
            sample_interval: duration_or(&timing.sample_interval, DEFAULT_SAMPLE_INTERVAL)?,
            run_duration: duration_or(&timing.run_duration, DEFAULT_RUN_DURATION)?,
            shutdown_grace: duration_or(&timing.shutdown_grace, DEFAULT_SHUTDOWN_GRACE)?,
            stop_poll_interval: duration_or(
                &timing.stop_poll_interval,
                DEFAULT_STOP_POLL_INTERVAL,
            )?,
            max_sampling_failures: sampling
                .max_consecutive_failures
                .unwrap_or(DEFAULT_MAX_SAMPLING_FAILURES),
            smoothing_window: sampling.smoothing_window,
            step_size: workers.step,
        })
    }
}

fn duration_or(value: &Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    match value {
        Some(s) => parse_duration(s),
        None => Ok(default),
    }
}

// ── Run target ─────────────────────────────────────────────────────

/// Everything a control loop run needs to know, resolved and typed.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadTarget {
    pub target_rps: f64,
    pub min_workers: u32,
    pub max_workers: u32,
    /// Worker count the engine is started with.
    pub initial_workers: u32,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Anti-windup bounds for the integral term, as (low, high).
    pub integral_clamp: (f64, f64),
    pub sample_interval: Duration,
    /// Hard wall-clock cap on the run.
    pub run_duration: Duration,
    /// How long to wait for the engine to report stopped.
    pub shutdown_grace: Duration,
    pub stop_poll_interval: Duration,
    /// Consecutive sampling failures that abort the run.
    pub max_sampling_failures: u32,
    /// Moving-average window applied to measured rps before the
    /// controller. `None` feeds raw readings.
    pub smoothing_window: Option<usize>,
    /// When set, every non-zero worker delta is replaced by a step of
    /// exactly this size in the same direction.
    pub step_size: Option<u32>,
}

impl LoadTarget {
    /// A target with default gains and timing.
    pub fn new(target_rps: f64, min_workers: u32, max_workers: u32) -> Self {
        Self {
            target_rps,
            min_workers,
            max_workers,
            initial_workers: min_workers,
            kp: DEFAULT_KP,
            ki: DEFAULT_KI,
            kd: DEFAULT_KD,
            integral_clamp: DEFAULT_INTEGRAL_CLAMP,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            run_duration: DEFAULT_RUN_DURATION,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            stop_poll_interval: DEFAULT_STOP_POLL_INTERVAL,
            max_sampling_failures: DEFAULT_MAX_SAMPLING_FAILURES,
            smoothing_window: None,
            step_size: None,
        }
    }

    pub fn with_gains(mut self, kp: f64, ki: f64, kd: f64) -> Self {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
        self
    }

    /// Check bounds, gains, and intervals.
    ///
    /// Returns the non-fatal findings on success.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        if !self.target_rps.is_finite() || self.target_rps <= 0.0 {
            return Err(ConfigError::InvalidTarget(self.target_rps));
        }
        if self.min_workers == 0 {
            return Err(ConfigError::ZeroMinWorkers);
        }
        if self.max_workers < self.min_workers {
            return Err(ConfigError::InvalidWorkerBounds {
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        if self.initial_workers < self.min_workers || self.initial_workers > self.max_workers {
            return Err(ConfigError::InitialOutOfBounds {
                initial: self.initial_workers,
                min: self.min_workers,
                max: self.max_workers,
            });
        }
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteGain { name, value });
            }
        }
        let (low, high) = self.integral_clamp;
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(ConfigError::InvalidIntegralClamp { low, high });
        }
        for (name, d) in [
            ("sample_interval", self.sample_interval),
            ("run_duration", self.run_duration),
            ("shutdown_grace", self.shutdown_grace),
            ("stop_poll_interval", self.stop_poll_interval),
        ] {
            if d.is_zero() {
                return Err(ConfigError::NonPositiveDuration(name));
            }
            if d > MAX_DURATION {
                return Err(ConfigError::DurationTooLong { name, max: MAX_DURATION });
            }
        }
        if self.max_sampling_failures == 0 {
            return Err(ConfigError::ZeroCount("max_sampling_failures"));
        }
        if self.smoothing_window == Some(0) {
            return Err(ConfigError::ZeroCount("smoothing_window"));
        }
        if self.step_size == Some(0) {
            return Err(ConfigError::ZeroCount("step_size"));
        }

        let mut warnings = Vec::new();
        for (name, value) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if value < 0.0 {
                warnings.push(ConfigWarning::NegativeGain { name, value });
            }
        }
        if low > 0.0 || high < 0.0 {
            warnings.push(ConfigWarning::ClampExcludesZero { low, high });
        }
        if self.sample_interval > self.run_duration {
            warnings.push(ConfigWarning::IntervalExceedsDuration);
        }
        if self.stop_poll_interval > self.shutdown_grace {
            warnings.push(ConfigWarning::PollExceedsGrace);
        }
        if self.step_size.is_some() && (self.ki != 0.0 || self.kd != 0.0) {
            warnings.push(ConfigWarning::StepWithIntegralOrDerivative);
        }
        Ok(warnings)
    }
}

/// Structurally valid but probably not what the operator meant.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    NegativeGain { name: &'static str, value: f64 },
    ClampExcludesZero { low: f64, high: f64 },
    IntervalExceedsDuration,
    PollExceedsGrace,
    StepWithIntegralOrDerivative,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::NegativeGain { name, value } => {
                write!(f, "gain {name} is negative ({value}); output will push away from target")
            }
            ConfigWarning::ClampExcludesZero { low, high } => {
                write!(f, "integral_clamp ({low}, {high}) excludes 0; the integral starts clamped")
            }
            ConfigWarning::IntervalExceedsDuration => {
                write!(f, "sample_interval exceeds run_duration; no tick will run")
            }
            ConfigWarning::PollExceedsGrace => {
                write!(f, "stop_poll_interval exceeds shutdown_grace; stop is polled once")
            }
            ConfigWarning::StepWithIntegralOrDerivative => {
                write!(f, "fixed step sizing is usually paired with ki = kd = 0")
            }
        }
    }
}
