//! Simulated engine with an instantaneous throughput model.
//!
//! `current_rps = min(rps_cap, workers × rps_per_worker)`, updated the
//! moment a scale command lands. Faults can be injected per call so the
//! control loop's failure paths are reproducible.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use loadgrid_core::{ControlCommand, EngineError, EngineState, EngineStats, LoadEngine};

#[derive(Debug)]
struct SimState {
    state: EngineState,
    workers: u32,
    rps_per_worker: f64,
    rps_cap: f64,
    base_latency_ms: f64,
    /// Number of `stats()` calls so far.
    stats_calls: u64,
    /// 1-based `stats()` call indices that fail.
    failing_stats_calls: BTreeSet<u64>,
    /// Upcoming `start()` calls to reject.
    reject_starts: u32,
    /// Polls of `current_state()` that still report `Stopping`.
    /// `None` never finishes.
    stop_polls: Option<u32>,
    stop_polls_remaining: Option<u32>,
    starts: Vec<ControlCommand>,
    stop_calls: u32,
    total_requests: u64,
}

/// Deterministic engine for tests and dry runs. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    inner: Arc<Mutex<SimState>>,
}

impl SimulatedEngine {
    /// Each worker contributes `rps_per_worker`, capped at `rps_cap`.
    pub fn new(rps_per_worker: f64, rps_cap: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                state: EngineState::Ready,
                workers: 0,
                rps_per_worker,
                rps_cap,
                base_latency_ms: 20.0,
                stats_calls: 0,
                failing_stats_calls: BTreeSet::new(),
                reject_starts: 0,
                stop_polls: Some(0),
                stop_polls_remaining: None,
                starts: Vec::new(),
                stop_calls: 0,
                total_requests: 0,
            })),
        }
    }

    pub fn with_latency_ms(self, latency_ms: f64) -> Self {
        self.state().base_latency_ms = latency_ms;
        self
    }

    /// Make the given 1-based `stats()` calls fail.
    pub fn fail_stats_calls(&self, calls: impl IntoIterator<Item = u64>) {
        self.state().failing_stats_calls.extend(calls);
    }

    /// Reject the next `n` scale commands.
    pub fn reject_next_starts(&self, n: u32) {
        self.state().reject_starts = n;
    }

    /// Report `Stopping` for `polls` state reads after `stop()`.
    pub fn stop_after_polls(&self, polls: u32) {
        self.state().stop_polls = Some(polls);
    }

    /// Never finish stopping.
    pub fn never_stop(&self) {
        self.state().stop_polls = None;
    }

    /// Every accepted scale command, in order.
    pub fn starts(&self) -> Vec<ControlCommand> {
        self.state().starts.clone()
    }

    pub fn stop_calls(&self) -> u32 {
        self.state().stop_calls
    }

    pub fn stats_calls(&self) -> u64 {
        self.state().stats_calls
    }

    pub fn workers(&self) -> u32 {
        self.state().workers
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SimState {
    fn current_rps(&self) -> f64 {
        (self.workers as f64 * self.rps_per_worker).min(self.rps_cap)
    }

    /// Latency grows once demand exceeds the cap.
    fn latency_ms(&self) -> f64 {
        let demand = self.workers as f64 * self.rps_per_worker;
        if self.rps_cap > 0.0 && demand > self.rps_cap {
            self.base_latency_ms * demand / self.rps_cap
        } else {
            self.base_latency_ms
        }
    }
}

impl LoadEngine for SimulatedEngine {
    fn start(&self, worker_count: u32, spawn_rate: f64) -> Result<(), EngineError> {
        let mut s = self.state();
        if s.reject_starts > 0 {
            s.reject_starts -= 1;
            return Err(EngineError::Rejected("injected rejection".to_string()));
        }
        if s.state == EngineState::Stopping {
            return Err(EngineError::NotReady(s.state));
        }
        s.starts.push(ControlCommand {
            desired_workers: worker_count,
            spawn_rate,
        });
        s.workers = worker_count;
        s.state = EngineState::Running;
        debug!(workers = worker_count, "simulated engine scaled");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let mut s = self.state();
        s.stop_calls += 1;
        if matches!(s.state, EngineState::Stopping | EngineState::Stopped) {
            return Ok(());
        }
        s.state = EngineState::Stopping;
        s.stop_polls_remaining = s.stop_polls;
        Ok(())
    }

    fn current_state(&self) -> EngineState {
        let mut s = self.state();
        if s.state == EngineState::Stopping {
            let remaining = s.stop_polls_remaining;
            match remaining {
                Some(0) => {
                    s.state = EngineState::Stopped;
                    s.workers = 0;
                }
                Some(n) => s.stop_polls_remaining = Some(n - 1),
                None => {}
            }
        }
        s.state
    }

    fn stats(&self) -> Result<EngineStats, EngineError> {
        let mut s = self.state();
        s.stats_calls += 1;
        if s.failing_stats_calls.contains(&s.stats_calls) {
            return Err(EngineError::Telemetry(format!(
                "injected failure on call {}",
                s.stats_calls
            )));
        }
        let current_rps = s.current_rps();
        s.total_requests += current_rps.round() as u64;
        Ok(EngineStats {
            current_rps,
            avg_response_time: s.latency_ms(),
            total_requests: s.total_requests,
            total_failures: 0,
        })
    }

    fn active_worker_count(&self) -> Result<u32, EngineError> {
        Ok(self.state().workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rps_is_capped() {
        let engine = SimulatedEngine::new(2.0, 40.0);
        engine.start(10, 10.0).unwrap();
        assert_eq!(engine.stats().unwrap().current_rps, 20.0);
        engine.start(30, 30.0).unwrap();
        assert_eq!(engine.stats().unwrap().current_rps, 40.0);
    }

    #[test]
    fn latency_rises_past_the_cap() {
        let engine = SimulatedEngine::new(2.0, 40.0).with_latency_ms(10.0);
        engine.start(20, 20.0).unwrap();
        assert_eq!(engine.stats().unwrap().avg_response_time, 10.0);
        engine.start(40, 40.0).unwrap();
        assert_eq!(engine.stats().unwrap().avg_response_time, 20.0);
    }

    #[test]
    fn injected_stats_failures_hit_exact_calls() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        engine.start(5, 5.0).unwrap();
        engine.fail_stats_calls([2]);
        assert!(engine.stats().is_ok());
        assert!(engine.stats().is_err());
        assert!(engine.stats().is_ok());
        assert_eq!(engine.stats_calls(), 3);
    }

    #[test]
    fn rejected_starts_are_not_recorded() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        engine.reject_next_starts(1);
        assert!(engine.start(5, 5.0).is_err());
        engine.start(6, 6.0).unwrap();
        assert_eq!(engine.starts(), vec![ControlCommand::jump_to(6)]);
    }

    #[test]
    fn stop_completes_after_configured_polls() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        engine.start(5, 5.0).unwrap();
        engine.stop_after_polls(2);
        engine.stop().unwrap();
        assert_eq!(engine.current_state(), EngineState::Stopping);
        assert_eq!(engine.current_state(), EngineState::Stopping);
        assert_eq!(engine.current_state(), EngineState::Stopped);
        assert_eq!(engine.workers(), 0);
        assert_eq!(engine.stop_calls(), 1);
    }

    #[test]
    fn never_stop_stays_stopping() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        engine.start(5, 5.0).unwrap();
        engine.never_stop();
        engine.stop().unwrap();
        for _ in 0..10 {
            assert_eq!(engine.current_state(), EngineState::Stopping);
        }
    }
}
