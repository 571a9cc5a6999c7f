//! `status` and `reset`: session inspection and teardown.

use anyhow::Result;

use super::super::Cli;
use super::state_dir;

pub fn cmd_status(cli: &Cli) -> Result<()> {
    use quorum::role::join_roles;
    use quorum::session::SessionRegistry;
    use quorum::store::{FileStateStore, StateStore};

    let dir = state_dir(cli);
    let registry = SessionRegistry::new(&dir);
    let Some(session) = registry.resolve(cli.session.as_deref()) else {
        println!("STATUS: idle");
        return Ok(());
    };
    let store = FileStateStore::new(&dir);
    let Some(state) = store.load(&session)? else {
        // A dangling pointer to a finished session reads as idle.
        println!("STATUS: idle");
        return Ok(());
    };

    println!("SESSION: {session}");
    println!("CHAIN: {}", state.chain_name);
    println!("STATUS: {}", state.status);
    println!("PHASE: {}/{}", state.completed_count(), state.total_phases());
    if !state.pending_roles.is_empty() {
        println!("PENDING: {}", join_roles(&state.pending_roles));
    }
    if let Some(branch) = &state.branch_active {
        println!("BRANCH: {branch}");
    }
    if !state.pending_conditions.is_empty() {
        println!("CONDITIONS:");
        for cond in &state.pending_conditions {
            println!(
                "  - {} {}",
                cond.condition,
                console::style(format!("({})", cond.from_role)).dim()
            );
        }
    }
    println!("TASK: {}", console::style(&state.task).dim());
    Ok(())
}

pub fn cmd_reset(cli: &Cli) -> Result<()> {
    use quorum::session::SessionRegistry;
    use quorum::store::{FileStateStore, StateStore};

    let dir = state_dir(cli);
    let registry = SessionRegistry::new(&dir);
    match registry.resolve(cli.session.as_deref()) {
        None => println!("STATUS: idle"),
        Some(session) => {
            FileStateStore::new(&dir).delete(&session)?;
            registry.clear_current();
            println!("RESET: {session}");
        }
    }
    Ok(())
}
