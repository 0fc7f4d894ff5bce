//! In-memory session registry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::RelayError;

use super::connection::{SessionId, StreamingConnection};

/// Thread-safe mapping from [`SessionId`] to open [`StreamingConnection`]s.
///
/// Cloning is cheap; all clones share the same entries. Every entry's
/// connection is open: closing a connection removes its entry.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<SessionId, Arc<StreamingConnection>>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection under `id`.
    pub fn register(
        &self,
        id: SessionId,
        connection: Arc<StreamingConnection>,
    ) -> Result<(), RelayError> {
        let mut guard = self.write();
        if guard.contains_key(&id) {
            return Err(RelayError::DuplicateSession(id));
        }
        guard.insert(id, connection);
        Ok(())
    }

    /// Exact-match lookup.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<Arc<StreamingConnection>> {
        self.read()
            .get(id)
            .filter(|conn| conn.is_open())
            .map(Arc::clone)
    }

    /// Exact lookup when `id` is given, otherwise any open connection.
    ///
    /// The id-less branch is for clients and proxies that strip the session
    /// id. Which connection it picks is unspecified; with several sessions
    /// open it may not be the caller's.
    #[must_use]
    pub fn lookup_or_fallback(&self, id: Option<&str>) -> Option<Arc<StreamingConnection>> {
        match id {
            Some(id) => self.lookup(id),
            None => self
                .read()
                .values()
                .find(|conn| conn.is_open())
                .map(Arc::clone),
        }
    }

    /// Remove the entry for `id`. No-op if absent.
    pub fn remove(&self, id: &str) -> Option<Arc<StreamingConnection>> {
        self.write().remove(id)
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<Arc<StreamingConnection>> {
        self.write().drain().map(|(_, conn)| conn).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Arc<StreamingConnection>>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Arc<StreamingConnection>>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
