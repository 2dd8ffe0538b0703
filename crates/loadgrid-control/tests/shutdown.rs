//! Cancellation, elapsed runs, and engines that are slow to stop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use loadgrid_control::{ControlLoop, LoopPhase, StopReason};
use loadgrid_core::{LoadTarget, LoopError};
use loadgrid_engine::SimulatedEngine;

const INTERVAL: Duration = Duration::from_secs(1);

fn target() -> LoadTarget {
    let mut t = LoadTarget::new(40.0, 10, 200);
    t.initial_workers = 20;
    t.sample_interval = INTERVAL;
    t.run_duration = Duration::from_secs(60);
    t.shutdown_grace = Duration::from_secs(2);
    t.stop_poll_interval = Duration::from_millis(100);
    t
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_run_stops_before_next_tick() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    engine.stop_after_polls(3);

    let (tx, mut rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let ctl = ControlLoop::new(target(), Arc::new(engine.clone()), tx);
    let mut phase = ctl.phase_watch();
    let handle = tokio::spawn(ctl.run(stop_rx));

    for _ in 0..3 {
        rx.recv().await.unwrap();
    }
    assert_eq!(*phase.borrow(), LoopPhase::Running);

    let cancelled_at = Instant::now();
    stop_tx.send(true).unwrap();

    phase.wait_for(|p| *p == LoopPhase::Stopping).await.unwrap();
    let report = handle.await.unwrap().unwrap();

    assert_eq!(*phase.borrow(), LoopPhase::Stopped);
    assert!(cancelled_at.elapsed() < INTERVAL, "took {:?}", cancelled_at.elapsed());
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.ticks, 3);
    assert!(!report.forced);
    assert_eq!(engine.stop_calls(), 1);
    assert_eq!(engine.workers(), 0);

    // Nothing was emitted after cancellation.
    assert!(rx.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn run_ends_when_duration_elapses() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    let mut t = target();
    t.run_duration = Duration::from_secs(3);

    let (tx, _rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let started = Instant::now();
    let report = ControlLoop::new(t, Arc::new(engine.clone()), tx)
        .run(stop_rx)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Elapsed);
    assert_eq!(report.ticks, 3);
    assert_eq!(report.samples_emitted, 3);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(engine.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn duration_shorter_than_interval_runs_no_ticks() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    let mut t = target();
    t.run_duration = Duration::from_millis(300);

    let (tx, _rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(false);
    let report = ControlLoop::new(t, Arc::new(engine.clone()), tx)
        .run(stop_rx)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Elapsed);
    assert_eq!(report.ticks, 0);
    assert_eq!(report.final_workers, 20);
    assert!(report.last_sample.is_none());
}

#[tokio::test(start_paused = true)]
async fn cancelled_before_first_tick() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    let (tx, _rx) = mpsc::channel(64);
    let (_stop_tx, stop_rx) = watch::channel(true);

    let report = ControlLoop::new(target(), Arc::new(engine.clone()), tx)
        .run(stop_rx)
        .await
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(report.ticks, 0);
    // Started at initial_workers, then stopped.
    assert_eq!(engine.starts().len(), 1);
    assert_eq!(engine.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn engine_that_never_stops_times_out() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    engine.never_stop();

    let (tx, mut rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let ctl = ControlLoop::new(target(), Arc::new(engine.clone()), tx);
    let phase = ctl.phase_watch();
    let handle = tokio::spawn(ctl.run(stop_rx));

    rx.recv().await.unwrap();
    let cancelled_at = Instant::now();
    stop_tx.send(true).unwrap();
    let err = handle.await.unwrap().unwrap_err();

    match err {
        LoopError::ShutdownTimeout { grace, context } => {
            assert_eq!(grace, Duration::from_secs(2));
            assert_eq!(context.tick, 1);
            assert!(context.last_sample.is_some());
        }
        other => panic!("expected ShutdownTimeout, got {other}"),
    }
    assert_eq!(cancelled_at.elapsed(), Duration::from_secs(2));
    assert_eq!(*phase.borrow(), LoopPhase::Stopped);
}

#[tokio::test(start_paused = true)]
async fn second_cancellation_forces_termination() {
    let engine = SimulatedEngine::new(1.0, 1000.0);
    engine.never_stop();

    let mut t = target();
    t.shutdown_grace = Duration::from_secs(30);
    let (tx, mut rx) = mpsc::channel(64);
    let (stop_tx, stop_rx) = watch::channel(false);
    let ctl = ControlLoop::new(t, Arc::new(engine.clone()), tx);
    let mut phase = ctl.phase_watch();
    let handle = tokio::spawn(ctl.run(stop_rx));

    rx.recv().await.unwrap();
    stop_tx.send(true).unwrap();
    phase.wait_for(|p| *p == LoopPhase::Stopping).await.unwrap();

    tokio::time::sleep(Duration::from_millis(550)).await;
    stop_tx.send(true).unwrap();
    let report = handle.await.unwrap().unwrap();

    assert!(report.forced);
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert_eq!(*phase.borrow(), LoopPhase::Stopped);
}
