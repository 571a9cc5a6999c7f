//! Chain configuration: declarative chain definitions, branch rules, and
//! exit rules, loaded from a YAML file.
//!
//! Configuration failures degrade rather than abort: a missing file falls
//! back to the built-in defaults, an unknown chain name falls back to the
//! configured default chain, and a role with no rule simply proceeds.

use crate::chain::RoleSpec;
use crate::errors::ChainError;
use crate::role::RoleId;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

fn default_max_loops() -> u32 {
    2
}

fn default_gate_role() -> RoleId {
    RoleId::new("sage").expect("static role name")
}

fn default_chain_name() -> String {
    "full".to_string()
}

/// A branch rule: when `from`'s result matches one of the condition
/// keywords, divert to `to`, at most `max_loops` times per edge.
#[derive(Debug, Clone, Deserialize)]
pub struct BranchRule {
    pub from: RoleId,
    pub to: RoleId,
    #[serde(deserialize_with = "one_or_many")]
    pub condition: Vec<String>,
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,
}

impl BranchRule {
    /// Branch-loop bookkeeping key for this edge.
    pub fn edge_key(&self) -> String {
        format!("{}->{}", self.from, self.to)
    }
}

/// An exit rule: when `role`'s result contains one of the keywords, the
/// chain is rejected with `reason`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExitRule {
    pub role: RoleId,
    pub keywords: Vec<String>,
    pub reason: String,
}

/// Keyword triggers used to select a chain from free task text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Triggers {
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One named chain: its declarative role list plus routing rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainDef {
    #[serde(default)]
    pub triggers: Triggers,
    #[serde(default)]
    pub roles: Vec<RoleSpec>,
    #[serde(default)]
    pub branches: Vec<BranchRule>,
    #[serde(default)]
    pub exit_conditions: Vec<ExitRule>,
}

impl ChainDef {
    /// Branch rules originating at `role`.
    pub fn branches_from<'a>(&'a self, role: &'a RoleId) -> impl Iterator<Item = &'a BranchRule> {
        self.branches.iter().filter(move |b| &b.from == role)
    }

    /// The branch rule targeting `to`, preferring one whose origin sits in
    /// the given role set (the phase being resumed).
    pub fn branch_to(&self, to: &RoleId, origin_hint: Option<&RoleId>) -> Option<&BranchRule> {
        if let Some(from) = origin_hint {
            if let Some(rule) = self
                .branches
                .iter()
                .find(|b| &b.to == to && &b.from == from)
            {
                return Some(rule);
            }
        }
        self.branches.iter().find(|b| &b.to == to)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_chain_name")]
    pub default_chain: String,
    /// Role whose rejection verdict overrides all configured rules.
    #[serde(default = "default_gate_role")]
    pub gate_role: RoleId,
    /// Role whose phase is skipped when no pending conditions exist.
    #[serde(default)]
    pub conditional_resolver: Option<RoleId>,
    #[serde(default)]
    pub chains: BTreeMap<String, ChainDef>,
}

impl ChainConfig {
    /// Load from a YAML file. A missing file is not an error: the built-in
    /// defaults are used and a warning is logged.
    pub fn load(path: &Path) -> Result<Self, ChainError> {
        if !path.exists() {
            warn!(path = %path.display(), "chain config not found, using built-in defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ChainError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_yaml::from_str(&raw).map_err(|source| ChainError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(config)
    }

    /// Select a chain for the given task text by case-insensitive keyword
    /// match. No match falls back to the default chain; an unknown default
    /// falls back to any configured chain rather than failing.
    pub fn select_chain(&self, task: &str) -> Option<(&str, &ChainDef)> {
        let task_lower = task.to_lowercase();
        for (name, def) in &self.chains {
            let hit = def
                .triggers
                .keywords
                .iter()
                .any(|kw| task_lower.contains(&kw.to_lowercase()));
            if hit {
                return Some((name.as_str(), def));
            }
        }
        if let Some(def) = self.chains.get(&self.default_chain) {
            return Some((self.default_chain.as_str(), def));
        }
        warn!(
            default = %self.default_chain,
            "default chain not configured, falling back to first chain"
        );
        self.chains.iter().next().map(|(n, d)| (n.as_str(), d))
    }

    /// Look up a chain by name. Callers treat `None` as an empty rule set
    /// (pass-through), never as a failure.
    pub fn chain(&self, name: &str) -> Option<&ChainDef> {
        self.chains.get(name)
    }
}

impl Default for ChainConfig {
    /// Built-in chain set used when no configuration file exists.
    fn default() -> Self {
        const DEFAULT_YAML: &str = r#"
default_chain: full
chains:
  full:
    triggers: { keywords: [feature, implement, 구현, 개발] }
    roles:
      - ideator
      - analyst
      - critic
      - architect
      - [left-state-councilor, right-state-councilor]
      - sage
      - executor
      - parallel: [inspector, validator]
      - historian
    branches:
      - { from: analyst, to: feasibility-checker, condition: [uncertain, 불확실], max_loops: 3 }
      - { from: critic, to: constraint-enforcer, condition: [violation, 위반], max_loops: 2 }
  quick:
    triggers: { keywords: [bug, fix, patch, 수정, 버그] }
    roles: [critic, architect, executor, validator]
  review:
    triggers: { keywords: [review, check, 검토, 리뷰] }
    roles: [critic, validator]
"#;
        serde_yaml::from_str(DEFAULT_YAML).expect("built-in defaults parse")
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
