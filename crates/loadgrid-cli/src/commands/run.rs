use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use loadgrid_control::{ControlLoop, RunReport};
use loadgrid_core::{parse_duration, LoadTarget, LoadgridConfig};
use loadgrid_engine::{WaitTime, WorkerPoolEngine, Workload};
use loadgrid_metrics::{Recorder, RecorderConfig, RecorderSummary};

/// Records buffered between the loop and the recorder.
const SINK_CAPACITY: usize = 256;

/// Command-line values that replace what the config file says.
#[derive(Debug, Default)]
pub struct Overrides {
    pub target_rps: Option<f64>,
    pub duration: Option<String>,
    pub min_workers: Option<u32>,
    pub max_workers: Option<u32>,
}

#[derive(Debug, Default)]
pub struct Outputs {
    pub record: Option<PathBuf>,
    pub prom_file: Option<PathBuf>,
    pub label: Option<String>,
}

pub async fn run(path: &Path, overrides: Overrides, outputs: Outputs) -> anyhow::Result<()> {
    let config = LoadgridConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let target = resolve_target(&config, &overrides)?;
    let (workload, wait) = resolve_workload(&config)?;

    let engine = WorkerPoolEngine::new(workload.clone(), wait)?;
    info!(?workload, wait_min = ?wait.min, wait_max = ?wait.max, "worker pool ready");

    let label = outputs.label.unwrap_or_else(|| run_label(path));
    let mut recorder_config = RecorderConfig::new(label, target.target_rps);
    recorder_config.jsonl_path = outputs.record;
    recorder_config.prom_path = outputs.prom_file;

    let (record_tx, record_rx) = mpsc::channel(SINK_CAPACITY);
    let recorder = tokio::spawn(Recorder::new(recorder_config).run(record_rx));

    // First Ctrl-C stops the run, a second one abandons the engine.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            info!("shutdown signal received");
            if shutdown_tx.send(true).is_err() {
                return;
            }
        }
    });

    let target_rps = target.target_rps;
    let result = ControlLoop::new(target, Arc::new(engine), record_tx)
        .run(shutdown_rx)
        .await;
    signal.abort();

    match recorder.await {
        Ok(Ok(summary)) => print_summary(target_rps, &summary),
        Ok(Err(e)) => warn!(error = %e, "recorder failed"),
        Err(e) => warn!(error = %e, "recorder task panicked"),
    }

    let report = result?;
    print_report(&report);
    Ok(())
}

/// Resolve the config file plus overrides into a run target.
pub fn resolve_target(config: &LoadgridConfig, overrides: &Overrides) -> anyhow::Result<LoadTarget> {
    let mut target = config.to_target()?;

    if let Some(rps) = overrides.target_rps {
        target.target_rps = rps;
    }
    if let Some(duration) = &overrides.duration {
        target.run_duration = parse_duration(duration)?;
    }
    if let Some(min) = overrides.min_workers {
        target.min_workers = min;
    }
    if let Some(max) = overrides.max_workers {
        target.max_workers = max;
    }
    // Keep the starting point inside bounds the operator just moved.
    if (overrides.min_workers.is_some() || overrides.max_workers.is_some())
        && target.min_workers <= target.max_workers
    {
        target.initial_workers = target
            .initial_workers
            .clamp(target.min_workers, target.max_workers);
    }

    Ok(target)
}

/// The `[workload]` section, or a 10–50 ms uniform workload with 1–2 s
/// think time when it is absent.
pub fn resolve_workload(config: &LoadgridConfig) -> anyhow::Result<(Workload, WaitTime)> {
    match &config.workload {
        Some(section) => Ok(Workload::from_config(section)?),
        None => Ok((
            Workload::default(),
            WaitTime::between(Duration::from_secs(1), Duration::from_secs(2)),
        )),
    }
}

fn run_label(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| "loadgrid".to_string())
}

fn print_summary(target_rps: f64, summary: &RecorderSummary) {
    if summary.records == 0 {
        println!("No ticks recorded.");
        return;
    }
    println!("Recorded {} ticks", summary.records);
    println!(
        "  Throughput: {:.2} rps mean (target {target_rps:.2}, mean |error| {:.2})",
        summary.mean_rps, summary.mean_abs_error
    );
    println!(
        "  Workers:    {}..{}",
        summary.min_workers, summary.max_workers
    );
    if let Some(last) = &summary.last {
        println!(
            "  Last tick:  #{} {:.2} rps, {:.1} ms, {} workers",
            last.tick,
            last.sample.measured_rps(),
            last.sample.avg_latency(),
            last.sample.active_workers()
        );
    }
}

fn print_report(report: &RunReport) {
    println!(
        "✓ Run finished ({:?}) after {} ticks, {} skipped",
        report.stop_reason, report.ticks, report.skipped_ticks
    );
    println!("  Final workers: {}", report.final_workers);
    if report.forced {
        println!("  Engine was abandoned before it finished stopping");
    }
}
