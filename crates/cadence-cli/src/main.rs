//! cadence - command-line access to Cadence execution logs
//!
//! - `inspect` prints entries of a JSON Lines log and a per-kind summary
//! - `verify` replays every recorded agent and fails on divergence
//! - `demo` records a short scripted session

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;

/// Cadence CLI application
#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence - deterministic tick kernel tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Kernel configuration file (TOML)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Tracing filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit tracing output as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print log entries and a per-kind summary
    Inspect {
        /// JSON Lines execution log
        log: PathBuf,

        /// Only entries of this agent
        #[arg(long)]
        agent: Option<String>,

        /// Only entries of this kind (e.g. TICK_OUTPUT)
        #[arg(long)]
        kind: Option<String>,
    },

    /// Replay recorded agents and compare state hashes
    Verify {
        /// JSON Lines execution log
        log: PathBuf,

        /// Only verify this agent
        #[arg(long)]
        agent: Option<String>,
    },

    /// Record a scripted session: one tool call, then a return
    Demo {
        /// Output JSON Lines file
        out: PathBuf,

        /// Agent id to spawn
        #[arg(long, default_value = "demo")]
        agent: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    cadence_kernel::init_tracing(&cli.log_level, cli.json)?;

    let config = match &cli.config {
        Some(path) => cadence_kernel::KernelConfig::load(path)?,
        None => cadence_kernel::KernelConfig::default(),
    };

    match cli.command {
        Commands::Inspect { log, agent, kind } => {
            commands::inspect(&log, agent.as_deref(), kind.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify { log, agent } => {
            let clean = commands::verify(&log, &config, agent.as_deref()).await?;
            Ok(if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Demo { out, agent } => {
            commands::demo(&out, config, &agent).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
