//! loadgrid — drive a load generator toward a target throughput.
//!
//! # Usage
//!
//! ```text
//! loadgrid init --output loadgrid.toml --target-rps 40
//! loadgrid check --config loadgrid.toml
//! loadgrid run --config loadgrid.toml --duration 2m --record ticks.jsonl
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "loadgrid",
    about = "Closed-loop load generation with PID-controlled concurrency",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a load test, adjusting workers every sample interval.
    Run {
        /// Path to loadgrid.toml.
        #[arg(short, long, default_value = "loadgrid.toml")]
        config: PathBuf,

        /// Override [target].rps.
        #[arg(long)]
        target_rps: Option<f64>,

        /// Override [timing].run_duration, e.g. "90s" or "5m".
        #[arg(long)]
        duration: Option<String>,

        /// Override [workers].min.
        #[arg(long)]
        min_workers: Option<u32>,

        /// Override [workers].max.
        #[arg(long)]
        max_workers: Option<u32>,

        /// Append every tick as a JSON line to this file.
        #[arg(long)]
        record: Option<PathBuf>,

        /// Rewrite a Prometheus textfile with the latest tick.
        #[arg(long)]
        prom_file: Option<PathBuf>,

        /// Label attached to exported metrics (default: config file stem).
        #[arg(long)]
        label: Option<String>,
    },
    /// Validate a config file and report questionable settings.
    Check {
        #[arg(short, long, default_value = "loadgrid.toml")]
        config: PathBuf,
    },
    /// Write a starter config file.
    Init {
        #[arg(short, long, default_value = "loadgrid.toml")]
        output: PathBuf,

        #[arg(long, default_value = "40")]
        target_rps: f64,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,loadgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run {
            config,
            target_rps,
            duration,
            min_workers,
            max_workers,
            record,
            prom_file,
            label,
        } => {
            let overrides = commands::run::Overrides {
                target_rps,
                duration,
                min_workers,
                max_workers,
            };
            let outputs = commands::run::Outputs {
                record,
                prom_file,
                label,
            };
            commands::run::run(&config, overrides, outputs).await
        }
        Command::Check { config } => commands::check::check(&config),
        Command::Init {
            output,
            target_rps,
            force,
        } => commands::init::init(&output, target_rps, force),
    }
}
