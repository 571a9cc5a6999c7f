//! Chain graph builder: declarative role specs to an ordered phase list.
//!
//! A chain's raw specification is a list whose elements are either a single
//! role name (one sequential phase), a bare list of role names (one parallel
//! phase), or an explicit `parallel:`/`sequential:` marker. The builder
//! resolves that into `Phase` nodes with 0-based indices and validates the
//! build-time precondition that no role appears in two phases.

use crate::chain::state::Phase;
use crate::errors::ChainError;
use crate::role::RoleId;
use serde::Deserialize;
use std::collections::BTreeSet;

/// One element of a chain's declarative role list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RoleSpec {
    /// A single role: one sequential phase.
    Role(RoleId),
    /// A bare list: one parallel phase.
    Group(Vec<RoleId>),
    /// An explicit `parallel:` or `sequential:` marker.
    Marker(GroupMarker),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMarker {
    Parallel(Vec<RoleId>),
    Sequential(Vec<RoleId>),
}

/// Resolves a declarative role list into an ordered phase sequence.
pub struct ChainGraphBuilder<'a> {
    chain_name: &'a str,
    specs: &'a [RoleSpec],
}

impl<'a> ChainGraphBuilder<'a> {
    pub fn new(chain_name: &'a str, specs: &'a [RoleSpec]) -> Self {
        Self { chain_name, specs }
    }

    /// Build the phase list.
    ///
    /// A `sequential` marker expands into one phase per role; a `parallel`
    /// marker or bare list produces a single phase with `is_parallel` set.
    /// A one-element group degenerates to a sequential phase.
    pub fn build(self) -> Result<Vec<Phase>, ChainError> {
        let mut phases = Vec::new();
        let mut seen: BTreeSet<RoleId> = BTreeSet::new();

        let mut push_single = |phases: &mut Vec<Phase>,
                               seen: &mut BTreeSet<RoleId>,
                               role: &RoleId|
         -> Result<(), ChainError> {
            if !seen.insert(role.clone()) {
                return Err(ChainError::DuplicateRole {
                    role: role.to_string(),
                    chain: self.chain_name.to_string(),
                });
            }
            phases.push(Phase::single(phases.len(), role.clone()));
            Ok(())
        };

        for spec in self.specs {
            match spec {
                RoleSpec::Role(role) => push_single(&mut phases, &mut seen, role)?,
                RoleSpec::Marker(GroupMarker::Sequential(roles)) => {
                    for role in roles {
                        push_single(&mut phases, &mut seen, role)?;
                    }
                }
                RoleSpec::Group(roles) | RoleSpec::Marker(GroupMarker::Parallel(roles)) => {
                    if roles.len() == 1 {
                        push_single(&mut phases, &mut seen, &roles[0])?;
                        continue;
                    }
                    let mut group = BTreeSet::new();
                    for role in roles {
                        if !seen.insert(role.clone()) || !group.insert(role.clone()) {
                            return Err(ChainError::DuplicateRole {
                                role: role.to_string(),
                                chain: self.chain_name.to_string(),
                            });
                        }
                    }
                    if !group.is_empty() {
                        phases.push(Phase::parallel(phases.len(), group));
                    }
                }
            }
        }

        if phases.is_empty() {
            return Err(ChainError::EmptyChain {
                chain: self.chain_name.to_string(),
            });
        }

        Ok(phases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str) -> RoleId {
        RoleId::new(name).unwrap()
    }

    #[test]
    fn test_build_sequential_chain() {
        let specs = vec![
            RoleSpec::Role(role("ideator")),
            RoleSpec::Role(role("critic")),
            RoleSpec::Role(role("executor")),
        ];
        let phases = ChainGraphBuilder::new("full", &specs).build().unwrap();

        assert_eq!(phases.len(), 3);
        assert_eq!(phases[0].index, 0);
        assert_eq!(phases[2].index, 2);
        assert!(phases.iter().all(|p| !p.is_parallel));
        assert_eq!(phases[1].sole_role(), Some(&role("critic")));
    }

    #[test]
    fn test_bare_list_is_parallel_phase() {
        let specs = vec![
            RoleSpec::Role(role("ideator")),
            RoleSpec::Group(vec![role("left"), role("right")]),
            RoleSpec::Role(role("executor")),
        ];
        let phases = ChainGraphBuilder::new("full", &specs).build().unwrap();

        assert_eq!(phases.len(), 3);
        assert!(phases[1].is_parallel);
        assert_eq!(phases[1].roles.len(), 2);
        assert_eq!(phases[1].index, 1);
    }

    #[test]
    fn test_sequential_marker_expands() {
        let specs = vec![RoleSpec::Marker(GroupMarker::Sequential(vec![
            role("historian"),
            role("reflector"),
        ]))];
        let phases = ChainGraphBuilder::new("post", &specs).build().unwrap();

        assert_eq!(phases.len(), 2);
        assert!(!phases[0].is_parallel);
        assert!(!phases[1].is_parallel);
    }

    #[test]
    fn test_parallel_marker() {
        let specs = vec![RoleSpec::Marker(GroupMarker::Parallel(vec![
            role("inspector"),
            role("validator"),
        ]))];
        let phases = ChainGraphBuilder::new("check", &specs).build().unwrap();

        assert_eq!(phases.len(), 1);
        assert!(phases[0].is_parallel);
    }

    #[test]
    fn test_single_element_group_is_sequential() {
        let specs = vec![RoleSpec::Group(vec![role("critic")])];
        let phases = ChainGraphBuilder::new("solo", &specs).build().unwrap();
        assert_eq!(phases.len(), 1);
        assert!(!phases[0].is_parallel);
    }

    #[test]
    fn test_duplicate_role_across_phases_rejected() {
        let specs = vec![
            RoleSpec::Role(role("critic")),
            RoleSpec::Group(vec![role("critic"), role("validator")]),
        ];
        let result = ChainGraphBuilder::new("dup", &specs).build();
        assert!(matches!(result, Err(ChainError::DuplicateRole { .. })));
    }

    #[test]
    fn test_empty_chain_rejected() {
        let specs: Vec<RoleSpec> = Vec::new();
        let result = ChainGraphBuilder::new("empty", &specs).build();
        assert!(matches!(result, Err(ChainError::EmptyChain { .. })));
    }

    #[test]
    fn test_role_spec_deserializes_from_yaml() {
        let yaml = r#"
- ideator
- [left-state-councilor, right-state-councilor]
- parallel: [inspector, validator]
- sequential: [historian, reflector]
"#;
        let specs: Vec<RoleSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs.len(), 4);
        assert!(matches!(specs[0], RoleSpec::Role(_)));
        assert!(matches!(specs[1], RoleSpec::Group(_)));
        assert!(matches!(specs[2], RoleSpec::Marker(GroupMarker::Parallel(_))));
        assert!(matches!(
            specs[3],
            RoleSpec::Marker(GroupMarker::Sequential(_))
        ));

        let phases = ChainGraphBuilder::new("full", &specs).build().unwrap();
        assert_eq!(phases.len(), 1 + 1 + 1 + 2);
        assert!(phases[1].is_parallel);
        assert!(phases[2].is_parallel);
    }
}
