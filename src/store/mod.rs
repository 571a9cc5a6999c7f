//! Session state persistence.
//!
//! The engine is a pure transition function; this layer owns durability.
//! `StateStore` is the seam: `FileStateStore` persists one JSON document per
//! session under a state directory with an exclusive lock file, and
//! `MemoryStateStore` backs tests and embedding callers with a plain map.
//!
//! `update` is the load-transition-persist primitive: it holds the session
//! lock across the whole read-modify-write so concurrent callers serialize
//! rather than clobber each other.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::MemoryStateStore;

use crate::chain::ChainState;
use crate::errors::StoreError;
use crate::session::SessionId;

pub trait StateStore {
    /// Read a session's document. `Ok(None)` means the session does not
    /// exist; only genuine read or parse failures are errors.
    fn load(&self, session: &SessionId) -> Result<Option<ChainState>, StoreError>;

    /// Persist the initial document for a new session.
    fn insert(&self, state: &ChainState) -> Result<(), StoreError>;

    /// Atomically load, transform, and persist a session's document. Fails
    /// with `NoActiveSession` when no document exists.
    fn update(
        &self,
        session: &SessionId,
        f: &mut dyn FnMut(ChainState) -> ChainState,
    ) -> Result<ChainState, StoreError>;

    /// Remove a session's document. Idempotent: deleting an absent session
    /// succeeds.
    fn delete(&self, session: &SessionId) -> Result<(), StoreError>;
}
