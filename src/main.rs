use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "quorum")]
#[command(version, about = "Chain orchestrator for multi-step approval workflows")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the chain configuration file. Missing files fall back to the
    /// built-in chains.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding session state documents. Defaults to
    /// QUORUM_STATE_DIR, then the system temp directory.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    /// Session to operate on. Defaults to QUORUM_SESSION_ID, then the
    /// current-session pointer.
    #[arg(short, long, global = true)]
    pub session: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start a new session, selecting a chain from the task text
    Start {
        task: String,

        /// Use this chain instead of keyword selection
        #[arg(long)]
        chain: Option<String>,
    },
    /// Report completion of one or more roles and advance the chain
    Complete {
        /// Role names; a parallel group can be reported in one batch
        #[arg(required = true)]
        roles: Vec<String>,

        /// Result text evaluated against branch, exit, and veto rules
        #[arg(short, long, default_value = "completed")]
        result: String,
    },
    /// Show the current session's phase and pending roles
    Status,
    /// Discard the session's state and clear the current-session pointer
    Reset,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "quorum=debug" } else { "quorum=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Start { task, chain } => cmd::cmd_start(&cli, task, chain.as_deref()),
        Commands::Complete { roles, result } => cmd::cmd_complete(&cli, roles, result),
        Commands::Status => cmd::cmd_status(&cli),
        Commands::Reset => cmd::cmd_reset(&cli),
    }
}
