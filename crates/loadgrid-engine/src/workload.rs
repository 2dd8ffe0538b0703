//! Synthetic workloads executed by each virtual user.

use std::time::Duration;

use tokio::time::Instant;

use loadgrid_core::{parse_duration, ConfigError, WorkloadConfig};

/// What one simulated request does.
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    /// Every request takes exactly `latency`.
    Constant { latency: Duration },
    /// Latency drawn uniformly from `[min, max]`.
    Uniform { min: Duration, max: Duration },
    /// Fixed latency, failing with probability `failure_rate`.
    Flaky { latency: Duration, failure_rate: f64 },
}

/// Result of one simulated request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOutcome {
    pub latency: Duration,
    pub success: bool,
}

impl Workload {
    /// Run one request to completion.
    pub async fn execute(&self) -> RequestOutcome {
        let started = Instant::now();
        let success = match self {
            Workload::Constant { latency } => {
                tokio::time::sleep(*latency).await;
                true
            }
            Workload::Uniform { min, max } => {
                tokio::time::sleep(uniform(*min, *max)).await;
                true
            }
            Workload::Flaky {
                latency,
                failure_rate,
            } => {
                tokio::time::sleep(*latency).await;
                fastrand::f64() >= *failure_rate
            }
        };
        RequestOutcome {
            latency: started.elapsed(),
            success,
        }
    }

    /// Resolve a `[workload]` section into a workload and think time.
    pub fn from_config(config: &WorkloadConfig) -> Result<(Workload, WaitTime), ConfigError> {
        let workload = match config.kind.as_str() {
            "constant" => Workload::Constant {
                latency: required(&config.latency, "latency")?,
            },
            "uniform" => {
                let min = required(&config.min_latency, "min_latency")?;
                let max = required(&config.max_latency, "max_latency")?;
                if max < min {
                    return Err(ConfigError::Workload(
                        "max_latency must be >= min_latency".to_string(),
                    ));
                }
                Workload::Uniform { min, max }
            }
            "flaky" => {
                let failure_rate = config.failure_rate.unwrap_or(0.0);
                if !(0.0..=1.0).contains(&failure_rate) {
                    return Err(ConfigError::Workload(format!(
                        "failure_rate must be within [0, 1], got {failure_rate}"
                    )));
                }
                Workload::Flaky {
                    latency: required(&config.latency, "latency")?,
                    failure_rate,
                }
            }
            other => {
                return Err(ConfigError::Workload(format!("unknown kind '{other}'")));
            }
        };

        let wait_min = optional(&config.wait_min)?.unwrap_or(Duration::ZERO);
        let wait_max = optional(&config.wait_max)?.unwrap_or(wait_min);
        if wait_max < wait_min {
            return Err(ConfigError::Workload(
                "wait_max must be >= wait_min".to_string(),
            ));
        }

        Ok((
            workload,
            WaitTime {
                min: wait_min,
                max: wait_max,
            },
        ))
    }
}

impl Default for Workload {
    fn default() -> Self {
        Workload::Uniform {
            min: Duration::from_millis(10),
            max: Duration::from_millis(50),
        }
    }
}

/// Think time a worker waits between requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitTime {
    pub min: Duration,
    pub max: Duration,
}

impl WaitTime {
    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn sample(&self) -> Duration {
        uniform(self.min, self.max)
    }
}

fn uniform(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_secs_f64();
    min + Duration::from_secs_f64(span * fastrand::f64())
}

fn required(value: &Option<String>, field: &str) -> Result<Duration, ConfigError> {
    match value {
        Some(s) => parse_duration(s),
        None => Err(ConfigError::Workload(format!("missing '{field}'"))),
    }
}

fn optional(value: &Option<String>) -> Result<Option<Duration>, ConfigError> {
    value.as_deref().map(parse_duration).transpose()
}
