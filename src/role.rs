//! Validated role identifiers.
//!
//! A `RoleId` is created once, when configuration is parsed or a chain is
//! built, so that branch and exit rules reference checked values instead of
//! raw strings. The newtype is serde-transparent: persisted documents and
//! YAML configuration see a plain string.

use crate::errors::ChainError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated role name: lowercase ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    /// Validate and wrap a role name.
    pub fn new(name: &str) -> Result<Self, ChainError> {
        if name.is_empty() {
            return Err(ChainError::InvalidRole {
                role: name.to_string(),
            });
        }
        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(ChainError::InvalidRole {
                role: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoleId {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for RoleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        RoleId::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// Join a role set for protocol output, e.g. `left,right`.
pub fn join_roles<'a, I>(roles: I) -> String
where
    I: IntoIterator<Item = &'a RoleId>,
{
    roles
        .into_iter()
        .map(RoleId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}
