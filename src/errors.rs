//! Typed error hierarchy for the quorum orchestrator.
//!
//! Two top-level enums cover the two subsystems:
//! - `StoreError` — session persistence and locking failures
//! - `ChainError` — chain construction and configuration failures
//!
//! Unknown chain names and roles with no configured rule are deliberately
//! *not* errors: both degrade to a safe default (fallback chain, proceed
//! verdict) so a configuration gap never aborts a running session.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the session state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session has no persisted document: it never existed, was reset,
    /// or already reached a terminal state.
    #[error("No active session '{session}'")]
    NoActiveSession { session: String },

    /// Lock contention exceeded the retry budget. Retriable, unlike
    /// `NoActiveSession`.
    #[error("Could not lock session '{session}' after {attempts} attempts")]
    LockTimeout { session: String, attempts: u32 },

    /// In-process store mutex was poisoned by a panicking holder.
    #[error("Session store lock poisoned")]
    LockPoisoned,

    #[error("State I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state document at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether the caller may retry the same operation and expect success.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

/// Errors from chain construction and configuration parsing.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid role name '{role}': expected lowercase ASCII, digits, '-' or '_'")]
    InvalidRole { role: String },

    #[error("Role '{role}' appears in more than one phase of chain '{chain}'")]
    DuplicateRole { role: String, chain: String },

    #[error("Chain '{chain}' resolves to no phases")]
    EmptyChain { chain: String },

    #[error("Failed to read chain configuration at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse chain configuration at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}
