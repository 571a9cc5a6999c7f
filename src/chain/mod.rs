//! Chain graph construction and the persisted session aggregate.
//!
//! A chain is a named, ordered sequence of phases; each phase is a single
//! role or a parallel group. `builder` resolves the declarative role list
//! from configuration into frozen `Phase` nodes; `state` holds the one
//! document persisted per session.

mod builder;
mod state;

pub use builder::{ChainGraphBuilder, GroupMarker, RoleSpec};
pub use state::{ChainState, ChainStatus, PendingCondition, Phase};
