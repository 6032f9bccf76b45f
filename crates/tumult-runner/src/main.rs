//! Tumult command line.
//!
//! # Usage
//!
//! ```bash
//! # Run a definition until its activities finish
//! tumult simulation.xml
//!
//! # Stop after one minute and keep the statistics
//! tumult simulation.xml --duration-ms 60000 --report stats.cbor
//! ```

use std::{path::PathBuf, process::ExitCode, str::FromStr, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use tumult_core::ForkMode;
use tumult_runner::{Runner, RunnerConfig, RunnerError};

/// Tumult traffic simulator
#[derive(Parser, Debug)]
#[command(name = "tumult")]
#[command(about = "Actor-based network traffic simulator")]
#[command(version)]
struct Args {
    /// Simulation definition (XML)
    definition: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Maximum concurrently running activities
    #[arg(long, default_value = "1024")]
    max_workers: usize,

    /// Stop the run after this many milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Fork mode for definitions that do not set one (first, all)
    #[arg(long, value_parser = ForkMode::from_str)]
    fork_mode: Option<ForkMode>,

    /// Write the statistics snapshot (CBOR) to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl From<Args> for RunnerConfig {
    fn from(args: Args) -> Self {
        Self {
            definition: args.definition,
            log_level: args.log_level,
            max_workers: args.max_workers,
            duration: args.duration_ms.map(Duration::from_millis),
            fork_mode: args.fork_mode,
            report: args.report,
            ..Self::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = RunnerConfig::from(Args::parse());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Tumult starting");
    tracing::info!("Definition {}", config.definition.display());

    match Runner::new(config).run_file().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        },
    }
}

#[allow(clippy::print_stderr)]
fn report_failure(err: &RunnerError) {
    tracing::error!(error = %err, config = err.is_config(), "run failed");
    eprintln!("error: {err}");
}
