//! Result-text classification.
//!
//! The engine never inspects raw result text; it consumes the typed verdict
//! produced here. `KeywordClassifier` is the keyword-list strategy the
//! orchestrator ships with, behind the `ResultClassifier` trait so the
//! strategy can be swapped without touching the state machine.

use crate::chain::PendingCondition;
use crate::config::ChainDef;
use crate::role::RoleId;
use regex::Regex;
use std::sync::LazyLock;

/// A gate role's veto vocabulary. Any of these in the gate's result text
/// rejects the chain regardless of configured rules.
pub const GATE_VETO_KEYWORDS: [&str; 5] = ["reject", "거부", "기각", "반려", "불가"];

/// Keywords in a branch role's result that resolve the active branch and
/// resume the interrupted phase.
pub const BRANCH_RESOLVED_KEYWORDS: [&str; 2] = ["resolved", "pass"];

// Conditional-approval markers: "조건부 승인: ..." or "conditional: ...",
// one condition per match, to end of line. Both ASCII and full-width colons
// appear in the wild.
static CONDITION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:조건부 승인|conditional)\s*[:：]\s*([^\n]+)").unwrap()
});

/// Typed routing verdict for one `(role, result)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Branch { to: RoleId, max_loops: u32 },
    Reject { reason: String },
}

/// Classification boundary between free result text and the state machine.
pub trait ResultClassifier {
    /// Evaluate a role's reported result. Exit rules are checked before
    /// branch rules so a terminal condition cannot be absorbed into a
    /// parallel-group aggregate.
    fn classify(&self, role: &RoleId, result: &str) -> Verdict;

    /// Extract conditional-approval entries surfaced by the result text.
    fn extract_conditions(&self, role: &RoleId, result: &str) -> Vec<PendingCondition>;
}

/// Keyword-list classifier built from one chain's configured rules.
pub struct KeywordClassifier<'a> {
    chain: &'a ChainDef,
    gate_role: &'a RoleId,
}

impl<'a> KeywordClassifier<'a> {
    pub fn new(chain: &'a ChainDef, gate_role: &'a RoleId) -> Self {
        Self { chain, gate_role }
    }

    fn is_gate_veto(&self, role: &RoleId, result_lower: &str) -> bool {
        role == self.gate_role
            && GATE_VETO_KEYWORDS
                .iter()
                .any(|kw| result_lower.contains(kw))
    }
}

impl ResultClassifier for KeywordClassifier<'_> {
    fn classify(&self, role: &RoleId, result: &str) -> Verdict {
        let result_lower = result.to_lowercase();

        // A gate role's veto short-circuits everything.
        if self.is_gate_veto(role, &result_lower) {
            return Verdict::Reject {
                reason: format!("{role} rejected: {}", result.trim()),
            };
        }

        // Exit rules, before any completion bookkeeping.
        for rule in self.chain.exit_conditions.iter().filter(|r| &r.role == role) {
            if rule
                .keywords
                .iter()
                .any(|kw| result_lower.contains(&kw.to_lowercase()))
            {
                return Verdict::Reject {
                    reason: rule.reason.clone(),
                };
            }
        }

        // Branch rules. A role with no rule proceeds; that is configuration
        // degradation, not an error.
        for rule in self.chain.branches_from(role) {
            if rule
                .condition
                .iter()
                .any(|kw| result_lower.contains(&kw.to_lowercase()))
            {
                return Verdict::Branch {
                    to: rule.to.clone(),
                    max_loops: rule.max_loops,
                };
            }
        }

        Verdict::Proceed
    }

    fn extract_conditions(&self, role: &RoleId, result: &str) -> Vec<PendingCondition> {
        CONDITION_REGEX
            .captures_iter(result)
            .filter_map(|cap| cap.get(1))
            .map(|m| PendingCondition {
                from_role: role.clone(),
                condition: m.as_str().trim().to_string(),
            })
            .filter(|c| !c.condition.is_empty())
            .collect()
    }
}

/// Whether a branch role's result resolves the active branch.
pub fn is_branch_resolved(result: &str) -> bool {
    let lower = result.to_lowercase();
    BRANCH_RESOLVED_KEYWORDS.iter().any(|kw| lower.contains(kw))
}
