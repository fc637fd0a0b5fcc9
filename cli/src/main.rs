//! coproc CLI binary
//!
//! Command-line front end for spawning, adopting and signalling processes.

use clap::{Parser, Subcommand};
use cli::{CliError, ExitReport, RunOptions, Runner, SignalKind};
use coproc_core::process::Executor;
use std::path::PathBuf;
use std::time::Duration;
use tracing::error;

#[derive(Parser)]
#[command(name = "coproc")]
#[command(about = "Spawn, adopt and signal processes with kill-on-drop handles")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Spawn a process and wait for it to exit
    Run {
        /// Path to a coproc.toml with [settings] and [launch] tables
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// Kill the process after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
        /// Leave the process running and exit immediately
        #[arg(long, conflicts_with = "timeout")]
        detach: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Executable and arguments; overrides [launch] from the config
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Adopt a running process and wait for it to exit
    Attach {
        pid: u32,
        /// Kill the process after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Send a single request to a process
    Signal {
        pid: u32,
        #[arg(long, value_enum)]
        kind: SignalKind,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn seconds(value: Option<f64>) -> Result<Option<Duration>, CliError> {
    value
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|e| {
                CliError::InvalidArgument(format!("--timeout {}: {}", secs, e))
            })
        })
        .transpose()
}

fn print_report(report: &ExitReport, json: bool) -> Result<(), CliError> {
    println!("{}", report.render(json)?);
    Ok(())
}

async fn execute(cli: Cli) -> Result<i32, CliError> {
    let runner = Runner::new(Executor::try_current()?);
    match cli.command {
        Commands::Run {
            config,
            timeout,
            detach,
            json,
            command,
        } => {
            let options = RunOptions {
                config,
                command,
                timeout: seconds(timeout)?,
                detach,
            };
            let report = runner.run(&options).await?;
            print_report(&report, json)?;
            Ok(report.exit_code.unwrap_or(0))
        }
        Commands::Attach { pid, timeout, json } => {
            let report = runner.attach(pid, seconds(timeout)?).await?;
            print_report(&report, json)?;
            Ok(report.exit_code.unwrap_or(0))
        }
        Commands::Signal { pid, kind, json } => {
            let report = runner.signal(pid, kind)?;
            print_report(&report, json)?;
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = coproc_core::utils::init_tracing(&cli.log_level) {
        eprintln!("{}", e);
    }

    match execute(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("error[{}]: {}", e.code(), e);
            std::process::exit(1);
        }
    }
}
