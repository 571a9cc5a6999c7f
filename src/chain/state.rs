//! The persisted session aggregate.
//!
//! `ChainState` is the single document the orchestrator stores per session.
//! Its serialized shape (camelCase field names, one JSON object per session)
//! is an external contract: interoperating tools read these files directly,
//! so renames here are breaking changes.

use crate::role::RoleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::session::SessionId;

/// One step of a chain: a single role, or a parallel group that must all
/// report before the chain advances. Immutable once the chain starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Phase {
    pub index: usize,
    pub roles: BTreeSet<RoleId>,
    pub is_parallel: bool,
}

impl Phase {
    pub fn single(index: usize, role: RoleId) -> Self {
        let mut roles = BTreeSet::new();
        roles.insert(role);
        Self {
            index,
            roles,
            is_parallel: false,
        }
    }

    pub fn parallel(index: usize, roles: BTreeSet<RoleId>) -> Self {
        Self {
            index,
            roles,
            is_parallel: true,
        }
    }

    /// The sole role of a sequential phase.
    pub fn sole_role(&self) -> Option<&RoleId> {
        if self.roles.len() == 1 {
            self.roles.iter().next()
        } else {
            None
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    /// Created but no phase activated yet
    #[default]
    Idle,
    /// A sequential phase is awaiting its role
    Running,
    /// A parallel phase is awaiting one or more of its roles
    WaitingParallel,
    /// A branch role is executing; the interrupted phase resumes afterwards
    Branching,
    /// All phases complete
    Approved,
    /// An exit rule, gate veto, or loop limit ended the chain
    Rejected,
}

impl ChainStatus {
    /// Terminal states delete the persisted document; no further
    /// transitions are accepted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingParallel => "waiting_parallel",
            Self::Branching => "branching",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(label)
    }
}

/// A condition surfaced by a role's result text, to be resolved by a later
/// conditional-resolution phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCondition {
    pub from_role: RoleId,
    pub condition: String,
}

/// The single persisted aggregate, one per session.
///
/// Mutated exclusively through the engine's transition function; persisted
/// atomically by the state store. The phase list is a snapshot frozen at
/// start so a later configuration edit cannot change a running session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainState {
    pub session_id: SessionId,
    pub task: String,
    pub chain_name: String,
    pub phases: Vec<Phase>,
    pub status: ChainStatus,
    pub current_phase_index: usize,
    pub completed_phase_indices: BTreeSet<usize>,
    /// Roles still expected before the current phase can close.
    pub pending_roles: BTreeSet<RoleId>,
    /// Roles of the current parallel phase that already reported.
    pub completed_parallel: BTreeSet<RoleId>,
    /// The diverted-to role while a branch is executing.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch_active: Option<RoleId>,
    /// Phase to resume once the active branch resolves.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch_return_phase: Option<usize>,
    /// Fire counts per branch edge, keyed `"<from>-><to>"`.
    pub branch_loops: BTreeMap<String, u32>,
    /// Last reported result text per role, kept for audit and condition
    /// extraction.
    pub role_results: BTreeMap<RoleId, String>,
    pub pending_conditions: Vec<PendingCondition>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exit_reason: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ChainState {
    /// Create the initial document for a freshly started chain. The first
    /// phase is activated by the engine, not here.
    pub fn new(session_id: SessionId, task: &str, chain_name: &str, phases: Vec<Phase>) -> Self {
        Self {
            session_id,
            task: task.to_string(),
            chain_name: chain_name.to_string(),
            phases,
            status: ChainStatus::Idle,
            current_phase_index: 0,
            completed_phase_indices: BTreeSet::new(),
            pending_roles: BTreeSet::new(),
            completed_parallel: BTreeSet::new(),
            branch_active: None,
            branch_return_phase: None,
            branch_loops: BTreeMap::new(),
            role_results: BTreeMap::new(),
            pending_conditions: Vec::new(),
            exit_reason: None,
            started_at: Utc::now(),
        }
    }

    /// The phase the session currently points at, if any.
    pub fn current_phase(&self) -> Option<&Phase> {
        self.phases.get(self.current_phase_index)
    }

    pub fn total_phases(&self) -> usize {
        self.phases.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed_phase_indices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleId {
        RoleId::new(name).unwrap()
    }

    fn sample_state() -> ChainState {
        let phases = vec![
            Phase::single(0, role("ideator")),
            Phase::parallel(1, [role("left"), role("right")].into_iter().collect()),
            Phase::single(2, role("executor")),
        ];
        ChainState::new(SessionId::generate(), "build the thing", "full", phases)
    }

    #[test]
    fn test_new_state_is_idle() {
        let state = sample_state();
        assert_eq!(state.status, ChainStatus::Idle);
        assert_eq!(state.current_phase_index, 0);
        assert!(state.completed_phase_indices.is_empty());
        assert!(state.branch_active.is_none());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ChainStatus::Approved.is_terminal());
        assert!(ChainStatus::Rejected.is_terminal());
        assert!(!ChainStatus::Running.is_terminal());
        assert!(!ChainStatus::WaitingParallel.is_terminal());
        assert!(!ChainStatus::Branching.is_terminal());
    }

    #[test]
    fn test_sole_role() {
        let p = Phase::single(0, role("critic"));
        assert_eq!(p.sole_role(), Some(&role("critic")));

        let p = Phase::parallel(1, [role("a"), role("b")].into_iter().collect());
        assert_eq!(p.sole_role(), None);
    }

    #[test]
    fn test_document_uses_camel_case_field_names() {
        let state = sample_state();
        let json = serde_json::to_value(&state).unwrap();
        let obj = json.as_object().unwrap();
        for key in [
            "sessionId",
            "task",
            "chainName",
            "phases",
            "status",
            "currentPhaseIndex",
            "completedPhaseIndices",
            "pendingRoles",
            "completedParallel",
            "branchLoops",
            "roleResults",
            "pendingConditions",
            "startedAt",
        ] {
            assert!(obj.contains_key(key), "missing field {key}");
        }
        // Phases carry camelCase too
        let phase = &json["phases"][1];
        assert_eq!(phase["isParallel"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_document_roundtrip() {
        let mut state = sample_state();
        state.status = ChainStatus::WaitingParallel;
        state
            .pending_roles
            .insert(RoleId::new("right").unwrap());
        state.branch_loops.insert("critic->enforcer".to_string(), 1);
        state.pending_conditions.push(PendingCondition {
            from_role: role("sage"),
            condition: "budget review required".to_string(),
        });

        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: ChainState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, ChainStatus::WaitingParallel);
        assert_eq!(back.branch_loops["critic->enforcer"], 1);
        assert_eq!(back.pending_conditions.len(), 1);
        assert_eq!(back.phases, state.phases);
    }
}
