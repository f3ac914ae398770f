//! Weft command-line tool
//!
//! Drives the scheduler from the command line:
//! - `weft simulate`: run a request-per-task workload and report
//!   scheduler statistics and pinning events
//! - `weft config`: print the effective configuration

mod commands;
mod logger;
mod output;
mod settings;

use clap::{Parser, Subcommand};
use commands::simulate::{LockKind, OutputFormat, SimulateOptions};
use logger::LogLevel;
use output::ColorMode;
use settings::{Overrides, Settings};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "M:N task scheduler with pinning diagnostics", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./weft.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of carrier threads
    #[arg(long, global = true)]
    carriers: Option<usize>,

    /// Bound on the run queue
    #[arg(long, global = true)]
    max_queue_depth: Option<usize>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevel>,

    /// Colored output
    #[arg(long, value_enum, global = true, default_value_t = ColorMode::Auto)]
    color: ColorMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a request-per-task workload
    Simulate {
        /// Number of requests (one Task each)
        #[arg(short = 'n', long, default_value_t = 200)]
        requests: usize,
        /// Share of requests that enter the exclusive section (0.0 to 1.0)
        #[arg(long, default_value_t = 0.1)]
        critical_share: f64,
        /// Milliseconds spent waiting inside the exclusive section
        #[arg(long, default_value_t = 20)]
        hold_ms: u64,
        /// Milliseconds spent waiting outside the exclusive section
        #[arg(long, default_value_t = 5)]
        work_ms: u64,
        /// Lock guarding the exclusive section
        #[arg(long, value_enum, default_value_t = LockKind::Hostile)]
        lock: LockKind,
        /// Seed for choosing critical requests
        #[arg(long)]
        seed: Option<u64>,
        /// Report format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let overrides = Overrides {
        carriers: cli.carriers,
        max_queue_depth: cli.max_queue_depth,
        log_level: cli.log_level,
    };
    let settings = Settings::resolve(cli.config.as_deref(), &cwd)?.apply(&overrides)?;
    logger::init_with_level(settings.log.level)?;

    match cli.command {
        Commands::Simulate {
            requests,
            critical_share,
            hold_ms,
            work_ms,
            lock,
            seed,
            format,
        } => {
            let options = SimulateOptions {
                requests,
                critical_share,
                hold: Duration::from_millis(hold_ms),
                work: Duration::from_millis(work_ms),
                lock,
                seed,
                format,
            };
            commands::simulate::execute(
                settings.scheduler,
                options,
                output::resolve_color_choice(cli.color),
            )
        }

        Commands::Config => commands::config::execute(&settings),
    }
}
