//! In-process session store for tests and embedding callers.

use crate::chain::ChainState;
use crate::errors::StoreError;
use crate::session::SessionId;
use crate::store::StateStore;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStateStore {
    sessions: Mutex<HashMap<SessionId, ChainState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, session: &SessionId) -> Result<Option<ChainState>, StoreError> {
        let sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(sessions.get(session).cloned())
    }

    fn insert(&self, state: &ChainState) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        sessions.insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    fn update(
        &self,
        session: &SessionId,
        f: &mut dyn FnMut(ChainState) -> ChainState,
    ) -> Result<ChainState, StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        let state = sessions
            .get(session)
            .cloned()
            .ok_or_else(|| StoreError::NoActiveSession {
                session: session.to_string(),
            })?;
        let next = f(state);
        sessions.insert(session.clone(), next.clone());
        Ok(next)
    }

    fn delete(&self, session: &SessionId) -> Result<(), StoreError> {
        let mut sessions = self.sessions.lock().map_err(|_| StoreError::LockPoisoned)?;
        sessions.remove(session);
        Ok(())
    }
}
