//! Registry of live controller sessions

use tracing::debug;

use super::connection::ControllerSession;
use super::key::SessionKey;
use crate::error::NvmfError;

/// A session the registry refused, handed back for teardown
pub struct InsertError {
    pub reason: NvmfError,
    pub session: ControllerSession,
}

/// Bounded collection of sessions, enumerated in connect order
pub struct ConnectionRegistry {
    sessions: Vec<ControllerSession>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Register a session under its key
    pub(super) fn insert(&mut self, session: ControllerSession) -> Result<(), InsertError> {
        let key = session.key();
        if self.contains(&key) {
            return Err(InsertError {
                reason: NvmfError::DuplicateSession(key.to_string()),
                session,
            });
        }
        if self.is_full() {
            return Err(InsertError {
                reason: NvmfError::OutOfResources(format!(
                    "session limit of {} reached",
                    self.capacity
                )),
                session,
            });
        }

        debug!("Registry: added {} ({} live)", key, self.sessions.len() + 1);
        self.sessions.push(session);
        Ok(())
    }

    /// Unregister a session, handing it back to the caller
    pub(super) fn remove(&mut self, key: &SessionKey) -> Result<ControllerSession, NvmfError> {
        let pos = self
            .sessions
            .iter()
            .position(|s| s.key() == *key)
            .ok_or_else(|| NvmfError::NotFound(format!("session {}", key)))?;
        debug!("Registry: removed {}", key);
        Ok(self.sessions.remove(pos))
    }

    pub fn find(&self, key: &SessionKey) -> Option<&ControllerSession> {
        self.sessions.iter().find(|s| s.key() == *key)
    }

    pub(crate) fn find_mut(&mut self, key: &SessionKey) -> Option<&mut ControllerSession> {
        self.sessions.iter_mut().find(|s| s.key() == *key)
    }

    /// Sessions in connect order
    pub fn iter(&self) -> impl Iterator<Item = &ControllerSession> {
        self.sessions.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ControllerSession> {
        self.sessions.iter_mut()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.find(key).is_some()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        self.sessions.iter().map(|s| s.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.capacity
    }

    /// Detach every session, newest first
    pub(super) fn drain(&mut self) -> Vec<ControllerSession> {
        let mut all: Vec<_> = self.sessions.drain(..).collect();
        all.reverse();
        all
    }
}
