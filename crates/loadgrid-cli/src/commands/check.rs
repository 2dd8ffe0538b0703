use std::path::Path;

use anyhow::Context;

use loadgrid_core::{duration::format_duration, LoadgridConfig};
use loadgrid_engine::Workload;

use super::run::resolve_workload;

pub fn check(path: &Path) -> anyhow::Result<()> {
    let lines = report(path)?;
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

/// Validate the file and describe the resolved run, one line per item.
fn report(path: &Path) -> anyhow::Result<Vec<String>> {
    let config = LoadgridConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;
    let target = config.to_target()?;
    let warnings = target.validate()?;
    let (workload, wait) = resolve_workload(&config)?;

    let mut lines = vec![
        format!("✓ {} is valid", path.display()),
        format!("  Target:   {:.2} rps", target.target_rps),
        format!(
            "  Workers:  {}..{} (start at {})",
            target.min_workers, target.max_workers, target.initial_workers
        ),
        format!(
            "  PID:      kp={} ki={} kd={} clamp=[{}, {}]",
            target.kp, target.ki, target.kd, target.integral_clamp.0, target.integral_clamp.1
        ),
        format!(
            "  Timing:   every {} for {}",
            format_duration(target.sample_interval),
            format_duration(target.run_duration)
        ),
        format!("  Workload: {}", describe(&workload)),
        format!(
            "  Think:    {}..{}",
            format_duration(wait.min),
            format_duration(wait.max)
        ),
    ];
    if let Some(step) = target.step_size {
        lines.push(format!("  Step:     fixed {step} workers"));
    }
    if let Some(window) = target.smoothing_window {
        lines.push(format!("  Smoothing: moving average over {window} samples"));
    }
    for warning in &warnings {
        lines.push(format!("⚠ {warning}"));
    }
    Ok(lines)
}

fn describe(workload: &Workload) -> String {
    match workload {
        Workload::Constant { latency } => format!("constant {}", format_duration(*latency)),
        Workload::Uniform { min, max } => {
            format!("uniform {}..{}", format_duration(*min), format_duration(*max))
        }
        Workload::Flaky {
            latency,
            failure_rate,
        } => format!(
            "flaky {} failing {:.1}%",
            format_duration(*latency),
            failure_rate * 100.0
        ),
    }
}
