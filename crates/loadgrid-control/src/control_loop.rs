//! The control loop. Sample, step, actuate and emit once per tick.
//!
//! A run walks `Init → Running → Stopping → Stopped`:
//!
//! - **Init** validates the target and starts the engine at
//!   `initial_workers`. Either failing is fatal.
//! - **Running** ticks every `sample_interval` until `run_duration` has
//!   elapsed or cancellation is observed. A tick whose sample cannot be
//!   read is skipped entirely; `max_sampling_failures` in a row end the
//!   run.
//! - **Stopping** asks the engine to stop and polls its state until it
//!   reports stopped, for at most `shutdown_grace`. A second
//!   cancellation abandons the wait.
//!
//! The current phase is published on a `watch` channel.

use std::fmt;
use std::future::pending;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use loadgrid_core::{
    EngineState, LoadEngine, LoadTarget, LoopError, RunContext, Sample, SamplingError, TickRecord,
};
use loadgrid_metrics::{MetricsSampler, MovingAverage};

use crate::actuator::{ActuationOutcome, WorkerPoolActuator};
use crate::pid::{ControllerState, PidController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Init,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopPhase::Init => "init",
            LoopPhase::Running => "running",
            LoopPhase::Stopping => "stopping",
            LoopPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why the loop left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `run_duration` elapsed.
    Elapsed,
    /// The shutdown signal fired.
    Cancelled,
}

/// Summary of a run that reached `Stopped` without a terminal error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Ticks attempted, including skipped ones.
    pub ticks: u64,
    /// Records accepted by the sink.
    pub samples_emitted: u64,
    /// Ticks skipped because sampling failed.
    pub skipped_ticks: u64,
    pub final_workers: u32,
    pub last_sample: Option<Sample>,
    pub final_state: ControllerState,
    pub stop_reason: StopReason,
    /// The engine was abandoned before it reported stopped.
    pub forced: bool,
}

pub struct ControlLoop {
    target: LoadTarget,
    engine: Arc<dyn LoadEngine>,
    sink: mpsc::Sender<TickRecord>,
    phase_tx: watch::Sender<LoopPhase>,
}

/// Mutable bookkeeping for one run.
struct Progress {
    tick: u64,
    emitted: u64,
    skipped: u64,
    consecutive_failures: u32,
    last_workers: u32,
    last_sample: Option<Sample>,
    state: ControllerState,
    sink_closed: bool,
}

impl Progress {
    fn context(&self) -> RunContext {
        RunContext {
            tick: self.tick,
            last_workers: self.last_workers,
            last_sample: self.last_sample,
        }
    }
}

impl ControlLoop {
    pub fn new(target: LoadTarget, engine: Arc<dyn LoadEngine>, sink: mpsc::Sender<TickRecord>) -> Self {
        let (phase_tx, _) = watch::channel(LoopPhase::Init);
        Self {
            target,
            engine,
            sink,
            phase_tx,
        }
    }

    /// Subscribe to phase transitions.
    pub fn phase_watch(&self) -> watch::Receiver<LoopPhase> {
        self.phase_tx.subscribe()
    }

    /// Drive the engine until the run ends.
    ///
    /// Setting `shutdown` to `true` cancels the run. Dropping its sender
    /// is not a cancellation.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<RunReport, LoopError> {
        let result = self.run_phases(&mut shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "control loop failed");
        }
        self.set_phase(LoopPhase::Stopped);
        result
    }

    async fn run_phases(&self, shutdown: &mut watch::Receiver<bool>) -> Result<RunReport, LoopError> {
        self.set_phase(LoopPhase::Init);
        for warning in self.target.validate()? {
            warn!(%warning, "questionable configuration");
        }
        let pid = PidController::from_target(&self.target)?;
        let sampler = MetricsSampler::new(self.engine.clone());
        let mut actuator = WorkerPoolActuator::from_target(self.engine.clone(), &self.target);

        let initial = self.target.initial_workers;
        actuator.start(initial).map_err(LoopError::Startup)?;
        info!(
            target_rps = self.target.target_rps,
            workers = initial,
            min = self.target.min_workers,
            max = self.target.max_workers,
            interval_ms = self.target.sample_interval.as_millis() as u64,
            "control loop started"
        );

        let mut progress = Progress {
            tick: 0,
            emitted: 0,
            skipped: 0,
            consecutive_failures: 0,
            last_workers: initial,
            last_sample: None,
            state: ControllerState::new(),
            sink_closed: false,
        };

        self.set_phase(LoopPhase::Running);
        let stop_reason = match self
            .tick_until_done(&pid, &sampler, &mut actuator, &mut progress, shutdown)
            .await
        {
            Ok(reason) => reason,
            Err(e) => {
                if let Err(stop_err) = self.engine.stop() {
                    warn!(error = %stop_err, "engine stop failed after loop error");
                }
                return Err(e);
            }
        };

        self.set_phase(LoopPhase::Stopping);
        info!(
            reason = ?stop_reason,
            ticks = progress.tick,
            workers = progress.last_workers,
            "stopping engine"
        );
        let forced = self.stop_engine(&progress, shutdown).await?;

        info!(
            ticks = progress.tick,
            emitted = progress.emitted,
            skipped = progress.skipped,
            forced,
            "control loop stopped"
        );
        Ok(RunReport {
            ticks: progress.tick,
            samples_emitted: progress.emitted,
            skipped_ticks: progress.skipped,
            final_workers: progress.last_workers,
            last_sample: progress.last_sample,
            final_state: progress.state,
            stop_reason,
            forced,
        })
    }

    async fn tick_until_done(
        &self,
        pid: &PidController,
        sampler: &MetricsSampler,
        actuator: &mut WorkerPoolActuator,
        progress: &mut Progress,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StopReason, LoopError> {
        let period = self.target.sample_interval;
        let started = Instant::now();
        // Durations are capped by validation, so these additions cannot overflow.
        let deadline = tokio::time::sleep_until(started + self.target.run_duration);
        tokio::pin!(deadline);

        // The first tick lands one period after start, so every dt is > 0.
        let mut ticker = tokio::time::interval_at(started + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut smoothing = self.target.smoothing_window.map(MovingAverage::new);
        let mut last_update = started;

        loop {
            tokio::select! {
                biased;
                _ = cancelled(shutdown) => {
                    info!(tick = progress.tick, "cancellation received");
                    return Ok(StopReason::Cancelled);
                }
                _ = ticker.tick() => {}
                _ = &mut deadline => return Ok(StopReason::Elapsed),
            }

            progress.tick += 1;
            let tick = progress.tick;

            let sample = match sampler.pull() {
                Ok(sample) => sample,
                Err(e) => {
                    self.on_sampling_failure(progress, e)?;
                    continue;
                }
            };
            progress.consecutive_failures = 0;
            progress.last_sample = Some(sample);

            let now = Instant::now();
            let dt = now.duration_since(last_update);
            let measured = sample.measured_rps();
            let filtered = match smoothing.as_mut() {
                Some(avg) => avg.push(measured),
                None => measured,
            };

            let (output, next_state) = pid.step(self.target.target_rps, filtered, dt, &progress.state)?;
            progress.state = next_state;
            last_update = now;

            let outcome = actuator.apply(output, sample.active_workers());
            progress.last_workers = match &outcome {
                ActuationOutcome::Failed { .. } => sample.active_workers(),
                other => other.desired_workers(),
            };

            debug!(
                tick,
                rps = measured,
                filtered,
                latency_ms = sample.avg_latency(),
                workers = sample.active_workers(),
                output,
                desired = outcome.desired_workers(),
                "tick"
            );

            self.emit(
                progress,
                TickRecord {
                    tick,
                    sample,
                    desired_workers: outcome.desired_workers(),
                    filtered_rps: filtered,
                    output,
                },
            );

            if started.elapsed() >= self.target.run_duration {
                return Ok(StopReason::Elapsed);
            }
        }
    }

    fn on_sampling_failure(&self, progress: &mut Progress, e: SamplingError) -> Result<(), LoopError> {
        progress.consecutive_failures += 1;
        progress.skipped += 1;
        warn!(
            tick = progress.tick,
            failures = progress.consecutive_failures,
            error = %e,
            "sampling failed, skipping tick"
        );
        if progress.consecutive_failures >= self.target.max_sampling_failures {
            return Err(LoopError::SamplingExhausted {
                failures: progress.consecutive_failures,
                last: e,
                context: progress.context(),
            });
        }
        Ok(())
    }

    fn emit(&self, progress: &mut Progress, record: TickRecord) {
        match self.sink.try_send(record) {
            Ok(()) => progress.emitted += 1,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tick = record.tick, "sink full, dropping tick record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                if !progress.sink_closed {
                    warn!(tick = record.tick, "sink closed, tick records are no longer delivered");
                    progress.sink_closed = true;
                }
            }
        }
    }

    /// Returns whether the wait was abandoned.
    async fn stop_engine(
        &self,
        progress: &Progress,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, LoopError> {
        if let Err(e) = self.engine.stop() {
            warn!(error = %e, "engine stop failed");
        }
        // Only signals sent from here on count as a second cancellation.
        shutdown.borrow_and_update();

        let grace = self.target.shutdown_grace;
        let deadline = Instant::now() + grace;
        loop {
            let state = self.engine.current_state();
            if state == EngineState::Stopped {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(LoopError::ShutdownTimeout {
                    grace,
                    context: progress.context(),
                });
            }
            let wait = self.target.stop_poll_interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = next_signal(shutdown) => {
                    warn!(%state, "second cancellation, abandoning engine shutdown");
                    return Ok(true);
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn set_phase(&self, phase: LoopPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(from = %previous, to = %phase, "phase transition");
        }
    }
}

/// Resolves once the flag is `true`. Never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        pending::<()>().await;
    }
}

/// Resolves on the next send. Never resolves if the sender is gone.
async fn next_signal(rx: &mut watch::Receiver<bool>) {
    if rx.changed().await.is_err() {
        pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use loadgrid_core::ConfigError;
    use loadgrid_engine::SimulatedEngine;

    fn target() -> LoadTarget {
        let mut t = LoadTarget::new(40.0, 10, 200);
        t.initial_workers = 50;
        t.sample_interval = Duration::from_secs(1);
        t.run_duration = Duration::from_secs(5);
        t
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_is_the_worked_example() {
        // 0 rps measured against a 40 rps target, 50 workers running.
        let engine = SimulatedEngine::new(0.0, 100.0);
        let (tx, mut rx) = mpsc::channel(16);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut t = target();
        t.run_duration = Duration::from_secs(1);
        let report = ControlLoop::new(t, Arc::new(engine.clone()), tx)
            .run(stop_rx)
            .await
            .unwrap();

        let record = rx.recv().await.unwrap();
        assert_eq!(record.tick, 1);
        assert!((record.output - 6.4).abs() < 1e-9);
        assert_eq!(record.desired_workers, 56);
        assert_eq!(
            engine.starts().iter().map(|c| c.desired_workers).collect::<Vec<_>>(),
            vec![50, 56]
        );
        assert_eq!(report.ticks, 1);
        assert_eq!(report.stop_reason, StopReason::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_target_never_starts_engine() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        let (tx, _rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut t = target();
        t.max_workers = 5;
        let ctl = ControlLoop::new(t, Arc::new(engine.clone()), tx);
        let phase = ctl.phase_watch();
        let err = ctl.run(stop_rx).await.unwrap_err();

        assert!(matches!(
            err,
            LoopError::Config(ConfigError::InvalidWorkerBounds { min: 10, max: 5 })
        ));
        assert!(engine.starts().is_empty());
        assert_eq!(*phase.borrow(), LoopPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn huge_run_duration_is_a_config_error() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        let (tx, _rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut t = target();
        t.run_duration = Duration::from_secs_f64(1e19);
        let err = ControlLoop::new(t, Arc::new(engine.clone()), tx)
            .run(stop_rx)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LoopError::Config(ConfigError::DurationTooLong { name: "run_duration", .. })
        ));
        assert!(engine.starts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_start_is_fatal() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        engine.reject_next_starts(1);
        let (tx, _rx) = mpsc::channel(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let err = ControlLoop::new(target(), Arc::new(engine), tx)
            .run(stop_rx)
            .await
            .unwrap_err();
        match err {
            LoopError::Startup(e) => assert_eq!(e.desired, 50),
            other => panic!("expected startup error, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_sink_drops_records_without_blocking() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        let (tx, mut rx) = mpsc::channel(2);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = ControlLoop::new(target(), Arc::new(engine), tx)
            .run(stop_rx)
            .await
            .unwrap();

        assert_eq!(report.ticks, 5);
        assert_eq!(report.samples_emitted, 2);
        assert_eq!(rx.recv().await.map(|r| r.tick), Some(1));
        assert_eq!(rx.recv().await.map(|r| r.tick), Some(2));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_sink_does_not_stop_the_loop() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        let (tx, rx) = mpsc::channel(2);
        drop(rx);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = ControlLoop::new(target(), Arc::new(engine), tx)
            .run(stop_rx)
            .await
            .unwrap();
        assert_eq!(report.ticks, 5);
        assert_eq!(report.samples_emitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn smoothing_feeds_filtered_rps() {
        let engine = SimulatedEngine::new(1.0, 1000.0);
        let (tx, mut rx) = mpsc::channel(16);
        let (_stop_tx, stop_rx) = watch::channel(false);

        let mut t = target();
        t.run_duration = Duration::from_secs(2);
        t.smoothing_window = Some(30);
        ControlLoop::new(t, Arc::new(engine), tx)
            .run(stop_rx)
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.filtered_rps, first.sample.measured_rps());
        let expected = (first.sample.measured_rps() + second.sample.measured_rps()) / 2.0;
        assert_eq!(second.filtered_rps, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_shutdown_sender_is_not_a_cancellation() {
        let engine = SimulatedEngine::new(1.0, 100.0);
        let (tx, _rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let report = ControlLoop::new(target(), Arc::new(engine), tx)
            .run(stop_rx)
            .await
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::Elapsed);
        assert_eq!(report.ticks, 5);
    }
}
