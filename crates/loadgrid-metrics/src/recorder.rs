//! Recorder, the read-only reporting task.
//!
//! Drains the tick records emitted by the control loop. It never holds a
//! handle to controller or actuator state; the channel is its only input.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use loadgrid_core::TickRecord;

use crate::prometheus::render_prometheus;

pub const DEFAULT_HISTORY: usize = 300;
pub const DEFAULT_PRINT_EVERY: u64 = 10;

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Label attached to exported metrics.
    pub run_label: String,
    pub target_rps: f64,
    /// Records kept in memory; older ones are dropped.
    pub history: usize,
    /// Append every record as one JSON line.
    pub jsonl_path: Option<PathBuf>,
    /// Rewrite a Prometheus textfile after every record.
    pub prom_path: Option<PathBuf>,
    /// Log a stats line every N records. 0 disables.
    pub print_every: u64,
}

impl RecorderConfig {
    pub fn new(run_label: impl Into<String>, target_rps: f64) -> Self {
        Self {
            run_label: run_label.into(),
            target_rps,
            history: DEFAULT_HISTORY,
            jsonl_path: None,
            prom_path: None,
            print_every: DEFAULT_PRINT_EVERY,
        }
    }
}

/// What the recorder saw over a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderSummary {
    pub records: u64,
    pub mean_rps: f64,
    /// Mean of |target - measured| over all records.
    pub mean_abs_error: f64,
    pub min_workers: u32,
    pub max_workers: u32,
    pub last: Option<TickRecord>,
    /// The most recent records, oldest first.
    pub history: Vec<TickRecord>,
}

pub struct Recorder {
    config: RecorderConfig,
    history: VecDeque<TickRecord>,
    last: Option<TickRecord>,
    jsonl: Option<BufWriter<File>>,
    records: u64,
    rps_sum: f64,
    abs_error_sum: f64,
    min_workers: u32,
    max_workers: u32,
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history.min(DEFAULT_HISTORY * 4)),
            config,
            last: None,
            jsonl: None,
            records: 0,
            rps_sum: 0.0,
            abs_error_sum: 0.0,
            min_workers: u32::MAX,
            max_workers: 0,
        }
    }

    /// Consume records until the sender side closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<TickRecord>) -> anyhow::Result<RecorderSummary> {
        if let Some(path) = &self.config.jsonl_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            self.jsonl = Some(BufWriter::new(file));
            info!(path = %path.display(), "recording ticks as JSON lines");
        }

        while let Some(record) = rx.recv().await {
            self.observe(record).await;
        }

        if let Some(writer) = self.jsonl.as_mut() {
            writer.flush().await?;
        }

        let summary = self.summary();
        debug!(records = summary.records, "recorder finished");
        Ok(summary)
    }

    async fn observe(&mut self, record: TickRecord) {
        self.records += 1;
        let rps = record.sample.measured_rps();
        self.rps_sum += rps;
        self.abs_error_sum += (self.config.target_rps - rps).abs();
        self.min_workers = self.min_workers.min(record.desired_workers);
        self.max_workers = self.max_workers.max(record.desired_workers);
        self.last = Some(record);

        if self.config.history > 0 {
            if self.history.len() == self.config.history {
                self.history.pop_front();
            }
            self.history.push_back(record);
        }

        if self.config.print_every > 0 && record.tick % self.config.print_every == 0 {
            info!(
                tick = record.tick,
                rps = %format!("{rps:.2}"),
                target = self.config.target_rps,
                latency_ms = %format!("{:.1}", record.sample.avg_latency()),
                workers = record.sample.active_workers(),
                desired = record.desired_workers,
                "load stats"
            );
        }

        if let Err(e) = self.write_jsonl(&record).await {
            warn!(error = %e, "failed to append tick record; disabling JSON-lines output");
            self.jsonl = None;
        }

        if let Some(path) = self.config.prom_path.clone()
            && let Err(e) = self.write_prometheus(&path, &record).await
        {
            warn!(path = %path.display(), error = %e, "failed to write Prometheus textfile");
        }
    }

    async fn write_jsonl(&mut self, record: &TickRecord) -> anyhow::Result<()> {
        if let Some(writer) = self.jsonl.as_mut() {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        Ok(())
    }

    /// Write to a temp file and rename so scrapers never see a partial file.
    async fn write_prometheus(&self, path: &Path, record: &TickRecord) -> anyhow::Result<()> {
        let text = render_prometheus(&self.config.run_label, self.config.target_rps, record);
        let tmp = path.with_extension("prom.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn summary(&self) -> RecorderSummary {
        if self.records == 0 {
            return RecorderSummary::default();
        }
        RecorderSummary {
            records: self.records,
            mean_rps: self.rps_sum / self.records as f64,
            mean_abs_error: self.abs_error_sum / self.records as f64,
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            last: self.last,
            history: self.history.iter().copied().collect(),
        }
    }
}
