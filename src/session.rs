//! Session identifiers and the current-session pointer.
//!
//! The registry resolves "which session" exactly once, at the CLI boundary.
//! Precedence: explicit argument > `QUORUM_SESSION_ID` environment value >
//! last-written pointer file. The engine itself only ever sees an explicit
//! `SessionId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Environment variable consulted when no explicit session is given.
pub const SESSION_ENV: &str = "QUORUM_SESSION_ID";

const POINTER_FILE: &str = "quorum_current_session";

/// Opaque identifier scoping one run's persisted state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh id, `orch-` plus eight hex characters.
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("orch-{}", &uuid[..8]))
    }

    pub fn from_string(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Issues session ids and tracks the single "current session" pointer so a
/// caller need not pass the id on every invocation.
pub struct SessionRegistry {
    pointer_path: PathBuf,
}

impl SessionRegistry {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            pointer_path: state_dir.join(POINTER_FILE),
        }
    }

    /// Resolve the session to operate on. Explicit argument wins, then the
    /// environment, then the pointer file. Returns `None` when nothing is
    /// set anywhere.
    pub fn resolve(&self, explicit: Option<&str>) -> Option<SessionId> {
        if let Some(id) = explicit {
            if !id.is_empty() {
                return Some(SessionId::from_string(id));
            }
        }
        if let Ok(id) = std::env::var(SESSION_ENV) {
            if !id.is_empty() {
                return Some(SessionId::from_string(id));
            }
        }
        self.current()
    }

    /// Read the pointer file, if present and non-empty.
    pub fn current(&self) -> Option<SessionId> {
        let raw = fs::read_to_string(&self.pointer_path).ok()?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(SessionId::from_string(trimmed))
        }
    }

    /// Point the registry at a newly started session.
    pub fn set_current(&self, session: &SessionId) -> std::io::Result<()> {
        fs::write(&self.pointer_path, session.as_str())
    }

    /// Clear the pointer. Called on terminal states and explicit reset;
    /// idempotent.
    pub fn clear_current(&self) {
        if self.pointer_path.exists() {
            let _ = fs::remove_file(&self.pointer_path);
        }
    }
}
