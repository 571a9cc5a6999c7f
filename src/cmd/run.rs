//! `start` and `complete`: the two commands that drive a chain forward.

use anyhow::{Context, Result};

use super::super::Cli;
use super::{config_path, print_outcome, state_dir};

pub fn cmd_start(cli: &Cli, task: &str, chain_override: Option<&str>) -> Result<()> {
    use quorum::chain::{ChainGraphBuilder, ChainState};
    use quorum::config::ChainConfig;
    use quorum::engine::{Engine, KeywordClassifier};
    use quorum::session::{SessionId, SessionRegistry};
    use quorum::store::{FileStateStore, StateStore};

    let config = ChainConfig::load(&config_path(cli))?;
    let (chain_name, def) = match chain_override {
        Some(name) => {
            let def = config
                .chain(name)
                .with_context(|| format!("unknown chain '{name}'"))?;
            (name, def)
        }
        None => config
            .select_chain(task)
            .context("no chains configured")?,
    };

    let phases = ChainGraphBuilder::new(chain_name, &def.roles).build()?;
    let session = SessionId::generate();
    let state = ChainState::new(session.clone(), task, chain_name, phases);

    let classifier = KeywordClassifier::new(def, &config.gate_role);
    let engine = Engine::new(def, &classifier, config.conditional_resolver.as_ref());
    let (state, outcome) = engine.start(state);

    let dir = state_dir(cli);
    let store = FileStateStore::new(&dir);
    store.insert(&state)?;
    SessionRegistry::new(&dir)
        .set_current(&session)
        .context("Failed to write current-session pointer")?;

    println!("SESSION: {session}");
    println!("CHAIN: {chain_name}");
    println!("TOTAL_PHASES: {}", state.total_phases());
    print_outcome(&outcome);
    Ok(())
}

pub fn cmd_complete(cli: &Cli, roles: &[String], result: &str) -> Result<()> {
    use quorum::chain::ChainStatus;
    use quorum::config::{ChainConfig, ChainDef};
    use quorum::engine::{Engine, KeywordClassifier, Outcome};
    use quorum::role::RoleId;
    use quorum::session::SessionRegistry;
    use quorum::store::{FileStateStore, StateStore};

    let dir = state_dir(cli);
    let registry = SessionRegistry::new(&dir);
    let session = registry
        .resolve(cli.session.as_deref())
        .context("No active session. Run 'quorum start <task>' first")?;

    let reports: Vec<(RoleId, String)> = roles
        .iter()
        .map(|r| Ok((RoleId::new(r)?, result.to_string())))
        .collect::<Result<_, quorum::errors::ChainError>>()?;

    let config = ChainConfig::load(&config_path(cli))?;
    let store = FileStateStore::new(&dir);

    let mut outcome: Option<Outcome> = None;
    let updated = store.update(&session, &mut |state| {
        // A terminal document that escaped cleanup stays terminal.
        if state.status.is_terminal() {
            outcome = Some(match state.status {
                ChainStatus::Approved => Outcome::Approved,
                _ => Outcome::Rejected(state.exit_reason.clone().unwrap_or_default()),
            });
            return state;
        }
        // An unknown chain name degrades to an empty rule set.
        let fallback = ChainDef::default();
        let def = config.chain(&state.chain_name).unwrap_or(&fallback);
        let classifier = KeywordClassifier::new(def, &config.gate_role);
        let engine = Engine::new(def, &classifier, config.conditional_resolver.as_ref());
        let (next, out) = engine.apply(state, &reports);
        outcome = Some(out);
        next
    })?;
    let outcome = outcome.context("engine produced no outcome")?;

    if outcome.is_terminal() {
        store.delete(&session)?;
        registry.clear_current();
    }
    print_outcome(&outcome);
    if !outcome.is_terminal() {
        for cond in &updated.pending_conditions {
            println!("CONDITION: {}: {}", cond.from_role, cond.condition);
        }
    }
    Ok(())
}
