//! Closed-loop behaviour against the simulated engine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use loadgrid_control::{ControlLoop, StopReason};
use loadgrid_core::{LoadTarget, TickRecord};
use loadgrid_engine::SimulatedEngine;

const TARGET_RPS: f64 = 40.0;
const TOLERANCE: f64 = 0.5;

fn target() -> LoadTarget {
    let mut t = LoadTarget::new(TARGET_RPS, 1, 100).with_gains(0.5, 0.01, 0.0);
    t.integral_clamp = (-40.0, 40.0);
    t.sample_interval = Duration::from_secs(1);
    t.run_duration = Duration::from_secs(30);
    t
}

async fn run_against(engine: &SimulatedEngine, target: LoadTarget) -> Vec<TickRecord> {
    let (tx, mut rx) = mpsc::channel(256);
    let (_stop_tx, stop_rx) = watch::channel(false);

    let report = ControlLoop::new(target, Arc::new(engine.clone()), tx)
        .run(stop_rx)
        .await
        .expect("run should succeed");
    assert_eq!(report.stop_reason, StopReason::Elapsed);

    let mut records = Vec::new();
    while let Some(r) = rx.recv().await {
        records.push(r);
    }
    assert_eq!(records.len() as u64, report.samples_emitted);
    records
}

#[tokio::test(start_paused = true)]
async fn converges_to_target_and_holds() {
    for rps_per_worker in [0.5, 2.0, 3.0] {
        // The plant saturates at the target, like a service at capacity.
        let engine = SimulatedEngine::new(rps_per_worker, TARGET_RPS);
        let records = run_against(&engine, target()).await;
        assert_eq!(records.len(), 30);

        let converged_at = records
            .iter()
            .position(|r| (r.sample.measured_rps() - TARGET_RPS).abs() <= TOLERANCE)
            .unwrap_or_else(|| panic!("k={rps_per_worker}: never converged: {records:?}"));
        assert!(converged_at < 20, "k={rps_per_worker}: converged too late at tick {converged_at}");

        let settled = records[converged_at].sample.active_workers();
        for r in &records[converged_at..] {
            assert!(
                (r.sample.measured_rps() - TARGET_RPS).abs() <= TOLERANCE,
                "k={rps_per_worker}: drifted at tick {}: {} rps",
                r.tick,
                r.sample.measured_rps()
            );
            assert!(
                r.sample.active_workers().abs_diff(settled) <= 1,
                "k={rps_per_worker}: oscillated at tick {}: {} workers vs {settled}",
                r.tick,
                r.sample.active_workers()
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn holding_at_target_stops_actuating() {
    let engine = SimulatedEngine::new(2.0, TARGET_RPS);
    let records = run_against(&engine, target()).await;

    // Initial start, then a single jump to 20 workers.
    let starts: Vec<u32> = engine.starts().iter().map(|c| c.desired_workers).collect();
    assert_eq!(starts, vec![1, 20]);
    assert!(records[1..].iter().all(|r| r.desired_workers == 20));
}

#[tokio::test(start_paused = true)]
async fn worker_counts_respect_bounds() {
    // A plant that never gets anywhere near the target pins the loop at max.
    let engine = SimulatedEngine::new(0.01, 1000.0);
    let mut t = target();
    t.min_workers = 5;
    t.initial_workers = 5;
    t.max_workers = 25;
    let records = run_against(&engine, t).await;

    assert!(records.iter().all(|r| (5..=25).contains(&r.desired_workers)));
    assert_eq!(records.last().map(|r| r.desired_workers), Some(25));
    assert!(engine.starts().iter().all(|c| (5..=25).contains(&c.desired_workers)));

    // Once pinned, no further commands are issued.
    let pinned = engine.starts().iter().filter(|c| c.desired_workers == 25).count();
    assert_eq!(pinned, 1);
}

#[tokio::test(start_paused = true)]
async fn overshoot_is_pulled_back_to_min() {
    // Far too much throughput: the loop should walk down to min_workers.
    let engine = SimulatedEngine::new(50.0, 10_000.0);
    let mut t = target();
    t.min_workers = 2;
    t.initial_workers = 60;
    let records = run_against(&engine, t).await;

    assert_eq!(records.last().map(|r| r.desired_workers), Some(2));
    assert!(records.iter().all(|r| r.desired_workers >= 2));
}

#[tokio::test(start_paused = true)]
async fn fixed_step_moves_one_quantum_per_tick() {
    let engine = SimulatedEngine::new(1.0, TARGET_RPS);
    let mut t = target().with_gains(0.1, 0.0, 0.0);
    t.initial_workers = 10;
    t.step_size = Some(5);
    let records = run_against(&engine, t).await;

    let starts: Vec<u32> = engine.starts().iter().map(|c| c.desired_workers).collect();
    assert_eq!(&starts[..5], &[10, 15, 20, 25, 30]);
    for pair in starts.windows(2) {
        assert_eq!(pair[0].abs_diff(pair[1]), 5);
    }
    assert!(records.iter().all(|r| r.desired_workers <= 100));
}
