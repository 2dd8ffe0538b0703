//! Prometheus text exposition format.
//!
//! Renders the latest tick record for a node_exporter textfile collector
//! or any agent that scrapes the text format.

use loadgrid_core::TickRecord;

/// Render one tick record as Prometheus gauges.
///
/// `run` is attached as a label so several runs can share a collector.
pub fn render_prometheus(run: &str, target_rps: f64, record: &TickRecord) -> String {
    let mut out = String::new();
    let sample = &record.sample;

    gauge(&mut out, "loadgrid_target_rps", "Target requests per second.", run, format!("{target_rps:.2}"));
    gauge(
        &mut out,
        "loadgrid_measured_rps",
        "Measured requests per second.",
        run,
        format!("{:.2}", sample.measured_rps()),
    );
    gauge(
        &mut out,
        "loadgrid_filtered_rps",
        "Requests per second fed to the controller.",
        run,
        format!("{:.2}", record.filtered_rps),
    );
    gauge(
        &mut out,
        "loadgrid_avg_latency_ms",
        "Average response time in milliseconds.",
        run,
        format!("{:.2}", sample.avg_latency()),
    );
    gauge(
        &mut out,
        "loadgrid_active_workers",
        "Workers the engine reports as active.",
        run,
        sample.active_workers().to_string(),
    );
    gauge(
        &mut out,
        "loadgrid_desired_workers",
        "Worker count chosen by the controller.",
        run,
        record.desired_workers.to_string(),
    );
    gauge(
        &mut out,
        "loadgrid_controller_output",
        "Raw PID controller output.",
        run,
        format!("{:.4}", record.output),
    );
    gauge(&mut out, "loadgrid_tick", "Index of the latest tick.", run, record.tick.to_string());

    out
}

fn gauge(out: &mut String, name: &str, help: &str, run: &str, value: String) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name}{{run=\"{}\"}} {value}\n", escape_label(run)));
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
