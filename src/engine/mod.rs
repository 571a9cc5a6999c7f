//! The chain orchestration state machine.
//!
//! `Engine::apply` is a pure transition function over the persisted
//! `ChainState`: given a batch of completion reports it produces the next
//! state plus a typed `Outcome` for the caller to render. All I/O lives in
//! the state store; all text classification lives behind the
//! `ResultClassifier` trait.
//!
//! Transition order per completion batch:
//! 1. record results, extract conditions, classify every role — the first
//!    non-proceed verdict wins over the rest of the batch
//! 2. reject / branch activation (the triggering phase stays incomplete)
//! 3. resolution of an already-active branch
//! 4. parallel-phase bookkeeping
//! 5. advancement, skipping an empty conditional-resolution phase

mod classifier;

pub use classifier::{
    is_branch_resolved, KeywordClassifier, ResultClassifier, Verdict, BRANCH_RESOLVED_KEYWORDS,
    GATE_VETO_KEYWORDS,
};

use crate::chain::{ChainState, ChainStatus, Phase};
use crate::config::ChainDef;
use crate::role::RoleId;
use std::collections::BTreeSet;
use tracing::debug;

/// What a completion batch amounted to, mirroring the external protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A sequential phase is now awaiting this role.
    Next(RoleId),
    /// A parallel phase is now awaiting all of these roles.
    NextParallel(Vec<RoleId>),
    /// The current parallel phase is still waiting on these roles.
    Pending(Vec<RoleId>),
    /// A branch edge fired; the named role must now run.
    Branch {
        to: RoleId,
        loops: u32,
        max_loops: u32,
    },
    /// The active branch did not resolve and repeats.
    BranchRetry {
        to: RoleId,
        loops: u32,
        max_loops: u32,
    },
    /// All phases complete.
    Approved,
    /// An exit rule, gate veto, or loop limit ended the chain.
    Rejected(String),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected(_))
    }
}

/// The transition function, parameterized by one chain's routing rules.
pub struct Engine<'a> {
    chain: &'a ChainDef,
    classifier: &'a dyn ResultClassifier,
    conditional_resolver: Option<&'a RoleId>,
}

impl<'a> Engine<'a> {
    pub fn new(
        chain: &'a ChainDef,
        classifier: &'a dyn ResultClassifier,
        conditional_resolver: Option<&'a RoleId>,
    ) -> Self {
        Self {
            chain,
            classifier,
            conditional_resolver,
        }
    }

    /// Activate the first phase of a freshly created state.
    pub fn start(&self, state: ChainState) -> (ChainState, Outcome) {
        self.settle(state, 0)
    }

    /// Apply a batch of completion reports. Batches are expected to be
    /// same-phase roles, but every role is classified individually.
    pub fn apply(&self, mut state: ChainState, reports: &[(RoleId, String)]) -> (ChainState, Outcome) {
        // 1. Record everything, then pick the winning verdict: the first
        // Reject or Branch in batch order overrides all other roles.
        let mut winner: Option<(RoleId, Verdict)> = None;
        for (role, result) in reports {
            state.role_results.insert(role.clone(), result.clone());
            state
                .pending_conditions
                .extend(self.classifier.extract_conditions(role, result));

            if winner.is_none() {
                match self.classifier.classify(role, result) {
                    Verdict::Proceed => {}
                    verdict => winner = Some((role.clone(), verdict)),
                }
            }
        }

        if let Some((role, verdict)) = winner {
            match verdict {
                Verdict::Reject { reason } => return self.reject(state, reason),
                Verdict::Branch { to, max_loops } => {
                    // A branch verdict on the role currently diverted to is
                    // resolution business, handled below.
                    if state.branch_active.as_ref() != Some(&role) {
                        return self.fire_branch(state, &role, to, max_loops, false);
                    }
                }
                Verdict::Proceed => unreachable!("proceed is never a winner"),
            }
        }

        // 3. Branch resolution.
        if let Some(active) = state.branch_active.clone() {
            if let Some((_, result)) = reports.iter().find(|(r, _)| *r == active) {
                return self.resolve_branch(state, &active, result);
            }
            // Reports for other roles while branching change nothing.
            debug!(branch = %active, "report ignored while branch active");
            let waiting: Vec<RoleId> = state.pending_roles.iter().cloned().collect();
            return (state, Outcome::Pending(waiting));
        }

        // 4. Parallel bookkeeping / sequential completion check.
        let Some(phase) = state.current_phase().cloned() else {
            // Past the last phase with a non-terminal status cannot be
            // produced by the engine; treat as approved for safety.
            return self.approve(state);
        };
        let reported: BTreeSet<&RoleId> = reports
            .iter()
            .map(|(r, _)| r)
            .filter(|r| phase.roles.contains(*r))
            .collect();
        if reported.is_empty() {
            // Nothing in the batch belongs to the active phase.
            let waiting: Vec<RoleId> = state.pending_roles.iter().cloned().collect();
            return (state, Outcome::Pending(waiting));
        }

        if phase.is_parallel {
            for role in reported {
                if state.pending_roles.remove(role) {
                    state.completed_parallel.insert(role.clone());
                }
            }
            if !state.pending_roles.is_empty() {
                state.status = ChainStatus::WaitingParallel;
                let waiting: Vec<RoleId> = state.pending_roles.iter().cloned().collect();
                return (state, Outcome::Pending(waiting));
            }
            state.completed_parallel.clear();
        }

        // A completed conditional-resolution phase discharges the conditions
        // it was activated to resolve.
        if self.is_resolver_phase(&phase) {
            state.pending_conditions.clear();
        }

        // 5. Advance.
        state
            .completed_phase_indices
            .insert(state.current_phase_index);
        let next = state.current_phase_index + 1;
        self.settle(state, next)
    }

    /// Park the state at the first runnable phase at or after `index`,
    /// skipping a conditional-resolution phase that has nothing to resolve.
    fn settle(&self, mut state: ChainState, mut index: usize) -> (ChainState, Outcome) {
        loop {
            if index >= state.phases.len() {
                return self.approve(state);
            }
            let phase = state.phases[index].clone();
            if self.is_resolver_phase(&phase) && state.pending_conditions.is_empty() {
                debug!(phase = index, "skipping conditional-resolution phase, nothing pending");
                state.completed_phase_indices.insert(index);
                index += 1;
                continue;
            }

            state.current_phase_index = index;
            state.pending_roles = phase.roles.clone();
            state.completed_parallel.clear();
            let outcome = if phase.is_parallel {
                state.status = ChainStatus::WaitingParallel;
                Outcome::NextParallel(phase.roles.iter().cloned().collect())
            } else {
                state.status = ChainStatus::Running;
                // A freshly built phase always has at least one role.
                Outcome::Next(phase.roles.iter().next().cloned().expect("non-empty phase"))
            };
            return (state, outcome);
        }
    }

    /// Charge the branch edge and either divert to the target or reject
    /// once the loop budget is exceeded.
    fn fire_branch(
        &self,
        mut state: ChainState,
        from: &RoleId,
        to: RoleId,
        max_loops: u32,
        retry: bool,
    ) -> (ChainState, Outcome) {
        let key = format!("{from}->{to}");
        let loops = state.branch_loops.get(&key).copied().unwrap_or(0) + 1;
        if loops > max_loops {
            return self.reject(
                state,
                format!("branch loop exceeded: {key} ({loops}/{max_loops})"),
            );
        }
        state.branch_loops.insert(key, loops);
        state.status = ChainStatus::Branching;
        state.branch_active = Some(to.clone());
        if !retry {
            state.branch_return_phase = Some(state.current_phase_index);
        }
        state.pending_roles = BTreeSet::from([to.clone()]);

        let outcome = if retry {
            Outcome::BranchRetry {
                to,
                loops,
                max_loops,
            }
        } else {
            Outcome::Branch {
                to,
                loops,
                max_loops,
            }
        };
        (state, outcome)
    }

    /// Handle the completion of the diverted-to role: a resolution keyword
    /// resumes the interrupted phase (not marked complete, re-executed);
    /// anything else re-fires the same edge under its loop budget.
    fn resolve_branch(
        &self,
        mut state: ChainState,
        active: &RoleId,
        result: &str,
    ) -> (ChainState, Outcome) {
        let return_phase = state
            .branch_return_phase
            .unwrap_or(state.current_phase_index);

        if is_branch_resolved(result) {
            debug!(branch = %active, phase = return_phase, "branch resolved, resuming");
            state.branch_active = None;
            state.branch_return_phase = None;
            return self.settle(state, return_phase);
        }

        // Unresolved: repeat, subject to the same budget as the initial fire.
        let origin_hint = state
            .phases
            .get(return_phase)
            .and_then(|p| p.sole_role())
            .cloned();
        let rule = self.chain.branch_to(active, origin_hint.as_ref());
        let (from, max_loops) = match rule {
            Some(rule) => (rule.from.clone(), rule.max_loops),
            // No rule knows this edge (config changed mid-run); fall back to
            // the return phase's role and the default budget.
            None => (
                origin_hint.unwrap_or_else(|| active.clone()),
                2,
            ),
        };
        self.fire_branch(state, &from, active.clone(), max_loops, true)
    }

    fn is_resolver_phase(&self, phase: &Phase) -> bool {
        match self.conditional_resolver {
            Some(resolver) => phase.sole_role() == Some(resolver),
            None => false,
        }
    }

    fn approve(&self, mut state: ChainState) -> (ChainState, Outcome) {
        state.status = ChainStatus::Approved;
        state.pending_roles.clear();
        state.exit_reason = Some("all phases complete".to_string());
        (state, Outcome::Approved)
    }

    fn reject(&self, mut state: ChainState, reason: String) -> (ChainState, Outcome) {
        state.status = ChainStatus::Rejected;
        state.pending_roles.clear();
        state.exit_reason = Some(reason.clone());
        (state, Outcome::Rejected(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainGraphBuilder;
    use crate::config::ChainConfig;
    use crate::session::SessionId;

    const CONFIG: &str = r#"
default_chain: full
conditional_resolver: condition-resolver
chains:
  full:
    roles:
      - ideator
      - [left, right]
      - executor
    branches:
      - { from: critic, to: constraint-enforcer, condition: violation, max_loops: 1 }
  branchy:
    roles:
      - critic
      - executor
    branches:
      - { from: critic, to: constraint-enforcer, condition: violation, max_loops: 1 }
  gated:
    roles:
      - critic
      - sage
      - executor
  conditional:
    roles:
      - critic
      - condition-resolver
      - executor
"#;

    struct Fixture {
        config: ChainConfig,
        chain_name: &'static str,
    }

    impl Fixture {
        fn new(chain_name: &'static str) -> Self {
            Self {
                config: serde_yaml::from_str(CONFIG).unwrap(),
                chain_name,
            }
        }

        fn start(&self) -> (ChainState, Outcome) {
            let def = self.config.chain(self.chain_name).unwrap();
            let phases = ChainGraphBuilder::new(self.chain_name, &def.roles)
                .build()
                .unwrap();
            let state = ChainState::new(SessionId::generate(), "task", self.chain_name, phases);
            self.engine_apply(|engine| engine.start(state))
        }

        fn complete(&self, state: ChainState, role: &str, result: &str) -> (ChainState, Outcome) {
            let reports = vec![(RoleId::new(role).unwrap(), result.to_string())];
            self.engine_apply(|engine| engine.apply(state, &reports))
        }

        fn engine_apply(
            &self,
            f: impl FnOnce(&Engine) -> (ChainState, Outcome),
        ) -> (ChainState, Outcome) {
            let def = self.config.chain(self.chain_name).unwrap();
            let classifier = KeywordClassifier::new(def, &self.config.gate_role);
            let engine = Engine::new(def, &classifier, self.config.conditional_resolver.as_ref());
            f(&engine)
        }
    }

    fn role(name: &str) -> RoleId {
        RoleId::new(name).unwrap()
    }

    #[test]
    fn test_start_activates_first_phase() {
        let fx = Fixture::new("full");
        let (state, outcome) = fx.start();
        assert_eq!(outcome, Outcome::Next(role("ideator")));
        assert_eq!(state.status, ChainStatus::Running);
        assert_eq!(state.current_phase_index, 0);
        assert_eq!(state.pending_roles, BTreeSet::from([role("ideator")]));
    }

    #[test]
    fn test_sequential_then_parallel_then_sequential() {
        // The scenario walk: ideator -> [left,right] -> executor
        let fx = Fixture::new("full");
        let (state, _) = fx.start();

        let (state, outcome) = fx.complete(state, "ideator", "ok");
        assert_eq!(
            outcome,
            Outcome::NextParallel(vec![role("left"), role("right")])
        );
        assert_eq!(state.status, ChainStatus::WaitingParallel);
        assert_eq!(state.pending_roles.len(), 2);

        let (state, outcome) = fx.complete(state, "left", "ok");
        assert_eq!(outcome, Outcome::Pending(vec![role("right")]));
        assert_eq!(state.status, ChainStatus::WaitingParallel);
        assert_eq!(state.pending_roles, BTreeSet::from([role("right")]));
        assert_eq!(state.completed_parallel, BTreeSet::from([role("left")]));

        let (state, outcome) = fx.complete(state, "right", "ok");
        assert_eq!(outcome, Outcome::Next(role("executor")));
        assert_eq!(state.status, ChainStatus::Running);
        assert_eq!(state.pending_roles, BTreeSet::from([role("executor")]));
        assert!(state.completed_parallel.is_empty());

        let (state, outcome) = fx.complete(state, "executor", "done");
        assert_eq!(outcome, Outcome::Approved);
        assert_eq!(state.status, ChainStatus::Approved);
        assert_eq!(state.completed_phase_indices.len(), 3);
    }

    #[test]
    fn test_duplicate_parallel_report_is_idempotent() {
        let fx = Fixture::new("full");
        let (state, _) = fx.start();
        let (state, _) = fx.complete(state, "ideator", "ok");
        let (state, _) = fx.complete(state, "left", "ok");

        // Reporting left again must not advance anything.
        let (state, outcome) = fx.complete(state, "left", "ok again");
        assert_eq!(outcome, Outcome::Pending(vec![role("right")]));
        assert_eq!(state.status, ChainStatus::WaitingParallel);
        assert_eq!(state.completed_parallel, BTreeSet::from([role("left")]));
    }

    #[test]
    fn test_report_outside_active_phase_changes_nothing() {
        let fx = Fixture::new("full");
        let (state, _) = fx.start();
        let before_index = state.current_phase_index;

        let (state, outcome) = fx.complete(state, "executor", "too early");
        assert_eq!(outcome, Outcome::Pending(vec![role("ideator")]));
        assert_eq!(state.current_phase_index, before_index);
        assert_eq!(state.status, ChainStatus::Running);
        // The result is still recorded for audit.
        assert!(state.role_results.contains_key(&role("executor")));
    }

    #[test]
    fn test_batch_completion_of_parallel_phase() {
        let fx = Fixture::new("full");
        let (state, _) = fx.start();
        let (state, _) = fx.complete(state, "ideator", "ok");

        let reports = vec![
            (role("left"), "ok".to_string()),
            (role("right"), "ok".to_string()),
        ];
        let (state, outcome) = fx.engine_apply(|engine| engine.apply(state, &reports));
        assert_eq!(outcome, Outcome::Next(role("executor")));
        assert_eq!(state.status, ChainStatus::Running);
    }

    #[test]
    fn test_branch_fire_resume_and_loop_limit() {
        // The scenario walk: critic -> constraint-enforcer, max_loops = 1.
        let fx = Fixture::new("branchy");
        let (state, _) = fx.start();

        let (state, outcome) = fx.complete(state, "critic", "license violation found");
        assert_eq!(
            outcome,
            Outcome::Branch {
                to: role("constraint-enforcer"),
                loops: 1,
                max_loops: 1
            }
        );
        assert_eq!(state.status, ChainStatus::Branching);
        assert_eq!(state.branch_active, Some(role("constraint-enforcer")));
        assert_eq!(state.branch_return_phase, Some(0));
        // The triggering phase is not marked complete.
        assert!(state.completed_phase_indices.is_empty());

        // Resolution resumes critic's phase at its original index.
        let (state, outcome) = fx.complete(state, "constraint-enforcer", "resolved");
        assert_eq!(outcome, Outcome::Next(role("critic")));
        assert_eq!(state.current_phase_index, 0);
        assert!(state.branch_active.is_none());
        assert_eq!(state.status, ChainStatus::Running);

        // The same keyword fires the edge a second time: over budget.
        let (state, outcome) = fx.complete(state, "critic", "still a violation");
        assert_eq!(state.status, ChainStatus::Rejected);
        match outcome {
            Outcome::Rejected(reason) => {
                assert!(reason.contains("critic->constraint-enforcer"));
                assert!(reason.contains("2/1"));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_retry_when_unresolved() {
        let fx = Fixture::new("full");
        let (state, _) = fx.start();
        // Inject a branch by hand against the full chain's rule set.
        let reports = vec![(role("critic"), "violation".to_string())];
        let (state, outcome) = fx.engine_apply(|engine| engine.apply(state, &reports));
        assert!(matches!(outcome, Outcome::Branch { loops: 1, .. }));

        // Unresolved completion re-fires the edge; max_loops is 1, so the
        // second charge rejects.
        let (state, outcome) =
            fx.complete(state, "constraint-enforcer", "cannot fix, still broken");
        assert_eq!(state.status, ChainStatus::Rejected);
        assert!(matches!(outcome, Outcome::Rejected(_)));
    }

    #[test]
    fn test_branch_retry_under_budget() {
        let yaml = r#"
chains:
  c:
    roles: [critic, executor]
    branches:
      - { from: critic, to: fixer, condition: violation, max_loops: 3 }
"#;
        let config: ChainConfig = serde_yaml::from_str(yaml).unwrap();
        let def = config.chain("c").unwrap();
        let phases = ChainGraphBuilder::new("c", &def.roles).build().unwrap();
        let classifier = KeywordClassifier::new(def, &config.gate_role);
        let engine = Engine::new(def, &classifier, None);

        let state = ChainState::new(SessionId::generate(), "t", "c", phases);
        let (state, _) = engine.start(state);
        let (state, _) = engine.apply(state, &[(role("critic"), "violation".into())]);
        let (state, outcome) =
            engine.apply(state, &[(role("fixer"), "not yet".into())]);
        assert_eq!(
            outcome,
            Outcome::BranchRetry {
                to: role("fixer"),
                loops: 2,
                max_loops: 3
            }
        );
        assert_eq!(state.status, ChainStatus::Branching);
        assert_eq!(state.branch_loops["critic->fixer"], 2);
        // Return phase is preserved across retries.
        assert_eq!(state.branch_return_phase, Some(0));
    }

    #[test]
    fn test_gate_veto_rejects_without_rules() {
        let fx = Fixture::new("gated");
        let (state, _) = fx.start();
        let (state, _) = fx.complete(state, "critic", "fine");

        let (state, outcome) = fx.complete(state, "sage", "불가: 예산 부족");
        assert_eq!(state.status, ChainStatus::Rejected);
        match outcome {
            Outcome::Rejected(reason) => assert!(reason.contains("sage")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_conditional_resolver_skipped_when_nothing_pending() {
        let fx = Fixture::new("conditional");
        let (state, _) = fx.start();

        let (state, outcome) = fx.complete(state, "critic", "all good");
        // condition-resolver is skipped entirely; executor is next.
        assert_eq!(outcome, Outcome::Next(role("executor")));
        assert!(state.completed_phase_indices.contains(&1));
        assert_eq!(state.current_phase_index, 2);
    }

    #[test]
    fn test_conditional_resolver_runs_when_conditions_pending() {
        let fx = Fixture::new("conditional");
        let (state, _) = fx.start();

        let (state, outcome) =
            fx.complete(state, "critic", "ok.\nconditional: add a rollback plan");
        assert_eq!(outcome, Outcome::Next(role("condition-resolver")));
        assert_eq!(state.pending_conditions.len(), 1);
        assert_eq!(state.pending_conditions[0].from_role, role("critic"));

        // Completing the resolver discharges the conditions.
        let (state, outcome) = fx.complete(state, "condition-resolver", "handled");
        assert_eq!(outcome, Outcome::Next(role("executor")));
        assert!(state.pending_conditions.is_empty());
    }

    #[test]
    fn test_reject_wins_over_branch_in_batch() {
        let yaml = r#"
chains:
  c:
    roles:
      - [a, b]
      - executor
    branches:
      - { from: a, to: fixer, condition: violation }
    exit_conditions:
      - { role: b, keywords: [fatal], reason: "b found a fatal flaw" }
"#;
        let config: ChainConfig = serde_yaml::from_str(yaml).unwrap();
        let def = config.chain("c").unwrap();
        let phases = ChainGraphBuilder::new("c", &def.roles).build().unwrap();
        let classifier = KeywordClassifier::new(def, &config.gate_role);
        let engine = Engine::new(def, &classifier, None);

        let state = ChainState::new(SessionId::generate(), "t", "c", phases);
        let (state, _) = engine.start(state);
        // a's branch verdict comes first in batch order and wins.
        let reports = vec![
            (role("a"), "violation".to_string()),
            (role("b"), "fatal".to_string()),
        ];
        let (state, outcome) = engine.apply(state, &reports);
        assert!(matches!(outcome, Outcome::Branch { .. }));
        assert_eq!(state.status, ChainStatus::Branching);

        // With b first, the rejection wins instead.
        let phases2 = ChainGraphBuilder::new("c", &def.roles).build().unwrap();
        let state2 = ChainState::new(SessionId::generate(), "t", "c", phases2);
        let (state2, _) = engine.start(state2);
        let reports = vec![
            (role("b"), "fatal".to_string()),
            (role("a"), "violation".to_string()),
        ];
        let (state2, outcome) = engine.apply(state2, &reports);
        assert_eq!(outcome, Outcome::Rejected("b found a fatal flaw".to_string()));
        assert_eq!(state2.status, ChainStatus::Rejected);
    }

    #[test]
    fn test_branch_from_parallel_phase_resumes_whole_group() {
        let yaml = r#"
chains:
  c:
    roles:
      - [a, b]
      - executor
    branches:
      - { from: a, to: fixer, condition: violation, max_loops: 2 }
"#;
        let config: ChainConfig = serde_yaml::from_str(yaml).unwrap();
        let def = config.chain("c").unwrap();
        let phases = ChainGraphBuilder::new("c", &def.roles).build().unwrap();
        let classifier = KeywordClassifier::new(def, &config.gate_role);
        let engine = Engine::new(def, &classifier, None);

        let state = ChainState::new(SessionId::generate(), "t", "c", phases);
        let (state, _) = engine.start(state);
        let (state, _) = engine.apply(state, &[(role("b"), "ok".into())]);
        let (state, outcome) = engine.apply(state, &[(role("a"), "violation".into())]);
        assert!(matches!(outcome, Outcome::Branch { .. }));

        // Resolution re-activates the full parallel group, including the
        // role that had already reported.
        let (state, outcome) = engine.apply(state, &[(role("fixer"), "resolved".into())]);
        assert_eq!(
            outcome,
            Outcome::NextParallel(vec![role("a"), role("b")])
        );
        assert_eq!(state.status, ChainStatus::WaitingParallel);
        assert_eq!(state.pending_roles.len(), 2);
        assert!(state.completed_parallel.is_empty());
        assert!(!state.completed_phase_indices.contains(&0));
    }

    #[test]
    fn test_completed_indices_stay_below_current() {
        let fx = Fixture::new("full");
        let (state, _) = fx.start();
        let (state, _) = fx.complete(state, "ideator", "ok");
        let (state, _) = fx.complete(state, "left", "ok");
        let (state, _) = fx.complete(state, "right", "ok");

        assert!(state
            .completed_phase_indices
            .iter()
            .all(|i| *i < state.current_phase_index));
    }
}
