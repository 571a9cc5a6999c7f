//! File-backed session store.
//!
//! One pretty-printed JSON document per session, named
//! `quorum_session_<id>.json`, guarded by a sibling `.lock` file taken with
//! an OS advisory lock. Writes go through a temp file in the same directory
//! followed by a rename, so a crash mid-write leaves the previous document
//! intact rather than a truncated one.

use crate::chain::ChainState;
use crate::errors::StoreError;
use crate::session::SessionId;
use crate::store::StateStore;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const LOCK_ATTEMPTS: u32 = 3;
const LOCK_BACKOFF: Duration = Duration::from_millis(100);

pub struct FileStateStore {
    dir: PathBuf,
}

/// Holds the session's `.lock` file for the duration of an operation.
/// The advisory lock releases when the file handle drops.
struct SessionLock {
    file: File,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn doc_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("quorum_session_{session}.json"))
    }

    fn lock_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("quorum_session_{session}.lock"))
    }

    /// Take the session's exclusive lock, retrying with linear backoff
    /// (100ms, 200ms, 300ms) before giving up with a retriable error.
    fn acquire_lock(&self, session: &SessionId) -> Result<SessionLock, StoreError> {
        let path = self.lock_path(session);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;

        for attempt in 1..=LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(SessionLock { file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    debug!(session = %session, attempt, "session lock contended, backing off");
                    if attempt < LOCK_ATTEMPTS {
                        std::thread::sleep(LOCK_BACKOFF * attempt);
                    }
                }
                Err(source) => return Err(StoreError::Io { path, source }),
            }
        }
        Err(StoreError::LockTimeout {
            session: session.to_string(),
            attempts: LOCK_ATTEMPTS,
        })
    }

    fn read_doc(&self, path: &Path) -> Result<Option<ChainState>, StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let state = serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(state))
    }

    /// Write the document via a same-directory temp file plus rename.
    fn write_doc(&self, path: &Path, state: &ChainState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let payload = serde_json::to_vec_pretty(state).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        let mut file = File::create(&tmp).map_err(io_err)?;
        file.write_all(&payload).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp, path).map_err(io_err)
    }

    fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl StateStore for FileStateStore {
    fn load(&self, session: &SessionId) -> Result<Option<ChainState>, StoreError> {
        self.read_doc(&self.doc_path(session))
    }

    fn insert(&self, state: &ChainState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let _lock = self.acquire_lock(&state.session_id)?;
        self.write_doc(&self.doc_path(&state.session_id), state)
    }

    fn update(
        &self,
        session: &SessionId,
        f: &mut dyn FnMut(ChainState) -> ChainState,
    ) -> Result<ChainState, StoreError> {
        let _lock = self.acquire_lock(session)?;
        let path = self.doc_path(session);
        let state = self
            .read_doc(&path)?
            .ok_or_else(|| StoreError::NoActiveSession {
                session: session.to_string(),
            })?;
        let next = f(state);
        self.write_doc(&path, &next)?;
        Ok(next)
    }

    fn delete(&self, session: &SessionId) -> Result<(), StoreError> {
        Self::remove_if_exists(&self.doc_path(session))?;
        Self::remove_if_exists(&self.lock_path(session))
    }
}
