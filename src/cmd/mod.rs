//! CLI command implementations.
//!
//! | Module  | Commands handled     |
//! |---------|----------------------|
//! | `run`   | `Start`, `Complete`  |
//! | `phase` | `Status`, `Reset`    |
//!
//! Output follows the line protocol interoperating tools parse:
//! `SESSION:`, `CHAIN:`, `TOTAL_PHASES:`, `NEXT:`, `PENDING:`, `BRANCH:`,
//! `CONDITION:`, `APPROVED`, `REJECTED:`. Diagnostics go to stderr via
//! tracing so stdout stays machine-readable.

pub mod phase;
pub mod run;

pub use phase::{cmd_reset, cmd_status};
pub use run::{cmd_complete, cmd_start};

use std::path::PathBuf;

use super::Cli;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "QUORUM_STATE_DIR";

/// Environment variable overriding the configuration file path.
pub const CONFIG_ENV: &str = "QUORUM_CONFIG";

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Where session documents live: flag, then environment, then temp dir.
pub(crate) fn state_dir(cli: &Cli) -> PathBuf {
    cli.state_dir
        .clone()
        .or_else(|| env_path(STATE_DIR_ENV))
        .unwrap_or_else(std::env::temp_dir)
}

/// Where chain configuration lives: flag, then environment, then
/// `quorum.yaml` in the working directory.
pub(crate) fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| env_path(CONFIG_ENV))
        .unwrap_or_else(|| PathBuf::from("quorum.yaml"))
}

/// Render an engine outcome as protocol lines.
pub(crate) fn print_outcome(outcome: &quorum::engine::Outcome) {
    use quorum::engine::Outcome;
    use quorum::role::join_roles;

    match outcome {
        Outcome::Next(role) => println!("NEXT: {role}"),
        Outcome::NextParallel(roles) => println!("NEXT: {}", join_roles(roles)),
        Outcome::Pending(roles) => println!("PENDING: {}", join_roles(roles)),
        Outcome::Branch {
            to,
            loops,
            max_loops,
        } => println!("BRANCH: {to} ({loops}/{max_loops})"),
        Outcome::BranchRetry {
            to,
            loops,
            max_loops,
        } => println!("BRANCH: {to} (retry {loops}/{max_loops})"),
        Outcome::Approved => println!("{}", console::style("APPROVED").green()),
        Outcome::Rejected(reason) => {
            println!("{}: {reason}", console::style("REJECTED").red())
        }
    }
}
