//! Worker pool engine with one tokio task per virtual user.
//!
//! Each worker runs the shared [`Workload`] in a loop, records the outcome
//! into [`RequestStats`], then waits a think time. Scaling up spawns new
//! workers; scaling down signals the newest ones to exit. When the spawn
//! rate is lower than the requested change, a ramp task moves one worker
//! at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use loadgrid_core::{EngineError, EngineState, EngineStats, LoadEngine};

use crate::stats::{RequestStats, DEFAULT_RPS_WINDOW};
use crate::workload::{WaitTime, Workload};

/// State shared with every worker task.
struct WorkerShared {
    workload: Workload,
    wait: WaitTime,
    stats: Mutex<RequestStats>,
}

/// A running virtual user.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct PoolInner {
    runtime: Handle,
    shared: Arc<WorkerShared>,
    workers: Mutex<Vec<WorkerSlot>>,
    state: Arc<Mutex<EngineState>>,
    ramp: Mutex<Option<JoinHandle<()>>>,
}

/// In-process load-generation engine.
#[derive(Clone)]
pub struct WorkerPoolEngine {
    inner: Arc<PoolInner>,
}

impl WorkerPoolEngine {
    /// Create an engine bound to the current tokio runtime.
    pub fn new(workload: Workload, wait: WaitTime) -> Result<Self, EngineError> {
        Self::with_rps_window(workload, wait, DEFAULT_RPS_WINDOW)
    }

    pub fn with_rps_window(
        workload: Workload,
        wait: WaitTime,
        rps_window: Duration,
    ) -> Result<Self, EngineError> {
        let runtime = Handle::try_current()
            .map_err(|e| EngineError::Internal(format!("no tokio runtime: {e}")))?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                runtime,
                shared: Arc::new(WorkerShared {
                    workload,
                    wait,
                    stats: Mutex::new(RequestStats::new(rps_window)),
                }),
                workers: Mutex::new(Vec::new()),
                state: Arc::new(Mutex::new(EngineState::Ready)),
                ramp: Mutex::new(None),
            }),
        })
    }
}

impl PoolInner {
    fn set_state(&self, state: EngineState) {
        *lock(&self.state) = state;
    }

    fn abort_ramp(&self) {
        if let Some(handle) = lock(&self.ramp).take() {
            handle.abort();
        }
    }

    /// Add or remove workers until exactly `target` are alive.
    fn resize(&self, target: u32) {
        self.resize_locked(&mut lock(&self.workers), target);
    }

    fn resize_locked(&self, workers: &mut Vec<WorkerSlot>, target: u32) {
        let target = target as usize;

        while workers.len() < target {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let shared = Arc::clone(&self.shared);
            let handle = self.runtime.spawn(run_worker(shared, shutdown_rx));
            workers.push(WorkerSlot {
                handle,
                shutdown_tx,
            });
        }

        while workers.len() > target {
            if let Some(slot) = workers.pop() {
                let _ = slot.shutdown_tx.send(true);
            }
        }
    }

    /// Move one worker toward `target`. Returns true once the ramp is
    /// over, either because `target` is reached or because the pool left
    /// `Spawning`.
    ///
    /// Lock order is workers, then state; `stop` takes them the same way.
    fn step_toward(&self, target: u32) -> bool {
        let mut workers = lock(&self.workers);
        let mut state = lock(&self.state);
        if *state != EngineState::Spawning {
            return true;
        }

        let current = workers.len() as u32;
        if current < target {
            self.resize_locked(&mut workers, current + 1);
        } else if current > target {
            self.resize_locked(&mut workers, current - 1);
        }

        let reached = workers.len() as u32 == target;
        if reached {
            *state = EngineState::Running;
        }
        reached
    }
}

impl LoadEngine for WorkerPoolEngine {
    fn start(&self, worker_count: u32, spawn_rate: f64) -> Result<(), EngineError> {
        if !spawn_rate.is_finite() || spawn_rate <= 0.0 {
            return Err(EngineError::Rejected(format!(
                "spawn_rate must be > 0, got {spawn_rate}"
            )));
        }

        let state = self.current_state();
        match state {
            EngineState::Stopping => return Err(EngineError::NotReady(state)),
            EngineState::Ready | EngineState::Stopped => {
                lock(&self.inner.shared.stats).reset(Instant::now());
                info!(workers = worker_count, spawn_rate, "worker pool starting");
            }
            EngineState::Spawning | EngineState::Running => {}
        }

        self.inner.abort_ramp();

        let current = lock(&self.inner.workers).len() as u32;
        let delta = current.abs_diff(worker_count);

        if delta == 0 || spawn_rate >= delta as f64 {
            self.inner.resize(worker_count);
            self.inner.set_state(EngineState::Running);
            debug!(from = current, to = worker_count, "worker pool resized");
            return Ok(());
        }

        self.inner.set_state(EngineState::Spawning);
        let inner = Arc::clone(&self.inner);
        let step = Duration::from_secs_f64(1.0 / spawn_rate);
        let ramp = self.inner.runtime.spawn(async move {
            loop {
                tokio::time::sleep(step).await;
                if inner.step_toward(worker_count) {
                    debug!(workers = worker_count, "worker pool ramp finished");
                    break;
                }
            }
        });
        *lock(&self.inner.ramp) = Some(ramp);
        debug!(from = current, to = worker_count, spawn_rate, "worker pool ramping");
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        let state = self.current_state();
        match state {
            EngineState::Stopped | EngineState::Stopping => return Ok(()),
            EngineState::Ready => {
                self.inner.set_state(EngineState::Stopped);
                return Ok(());
            }
            EngineState::Spawning | EngineState::Running => {}
        }

        self.inner.abort_ramp();

        // A ramp step already in flight sees `Stopping` and adds nothing.
        let slots: Vec<WorkerSlot> = {
            let mut workers = lock(&self.inner.workers);
            *lock(&self.inner.state) = EngineState::Stopping;
            workers.drain(..).collect()
        };
        let count = slots.len();
        for slot in &slots {
            let _ = slot.shutdown_tx.send(true);
        }

        let state = Arc::clone(&self.inner.state);
        self.inner.runtime.spawn(async move {
            for slot in slots {
                if let Err(e) = slot.handle.await {
                    warn!(error = %e, "worker task ended abnormally");
                }
            }
            *lock(&state) = EngineState::Stopped;
            info!(workers = count, "worker pool stopped");
        });
        Ok(())
    }

    fn current_state(&self) -> EngineState {
        *lock(&self.inner.state)
    }

    fn stats(&self) -> Result<EngineStats, EngineError> {
        let state = self.current_state();
        if state == EngineState::Ready {
            return Err(EngineError::NotReady(state));
        }
        Ok(lock(&self.inner.shared.stats).snapshot(Instant::now()))
    }

    fn active_worker_count(&self) -> Result<u32, EngineError> {
        Ok(lock(&self.inner.workers).len() as u32)
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Ok(ramp) = self.ramp.get_mut()
            && let Some(handle) = ramp.take()
        {
            handle.abort();
        }
        if let Ok(workers) = self.workers.get_mut() {
            for slot in workers.drain(..) {
                let _ = slot.shutdown_tx.send(true);
            }
        }
    }
}

/// One virtual user: execute, record, think, repeat until told to stop.
async fn run_worker(shared: Arc<WorkerShared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            outcome = shared.workload.execute() => {
                lock(&shared.stats).record(Instant::now(), outcome);
            }
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(shared.wait.sample()) => {}
            _ = shutdown.changed() => break,
        }
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
