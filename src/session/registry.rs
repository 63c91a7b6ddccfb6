//! Session Registry
//!
//! Process-wide directory of client sessions with:
//! - Primary index by client id, secondary index by name
//! - One registry lock for membership, separate per-session locks for traffic
//! - Lock order: registry first, session second, never the reverse

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::storage::SessionRecord;

use super::client::ClientSession;
use super::types::{ClientId, SessionError, MAX_NAME_LEN};

// ============================================================================
// Session Registry
// ============================================================================

/// Shared handle to every live session
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryMaps>>,
}

#[derive(Default)]
struct RegistryMaps {
    /// Owns every session
    by_id: HashMap<ClientId, Arc<ClientSession>>,

    /// Name index, always consistent with `by_id`
    by_name: HashMap<String, ClientId>,
}

impl RegistryMaps {
    fn insert(&mut self, session: Arc<ClientSession>) {
        self.by_name.insert(session.name().to_string(), session.id());
        self.by_id.insert(session.id(), session);
    }

    fn remove(&mut self, id: ClientId) -> Option<Arc<ClientSession>> {
        let session = self.by_id.remove(&id)?;
        if self.by_name.get(session.name()) == Some(&id) {
            self.by_name.remove(session.name());
        }
        Some(session)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Return the session for `id`, creating it under `name` if it is unknown
    pub fn create_or_get(
        &self,
        id: ClientId,
        name: &str,
    ) -> Result<Arc<ClientSession>, SessionError> {
        validate_name(name)?;

        let mut maps = self.inner.write();

        if let Some(existing) = maps.by_id.get(&id) {
            return Ok(Arc::clone(existing));
        }

        if maps.by_name.contains_key(name) {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        let session = Arc::new(ClientSession::new(id, name));
        maps.insert(Arc::clone(&session));

        tracing::info!(client_id = %id, name = %name, "Created client session");

        Ok(session)
    }

    /// Register a new client under a fresh id
    pub fn register(&self, name: &str) -> Result<Arc<ClientSession>, SessionError> {
        validate_name(name)?;

        if self.find_by_name(name).is_some() {
            return Err(SessionError::NameTaken(name.to_string()));
        }

        let mut id = Uuid::new_v4();
        while self.find_by_id(id).is_some() {
            id = Uuid::new_v4();
        }

        // create_or_get re-checks the name under the write lock
        self.create_or_get(id, name)
    }

    pub fn remove(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        let removed = self.inner.write().remove(id);

        if let Some(session) = &removed {
            tracing::info!(client_id = %id, name = %session.name(), "Removed client session");
        }

        removed
    }

    /// Remove `id` only if it is still idle once both locks are held
    ///
    /// A request that refreshed `last_seen` after the caller's snapshot keeps
    /// the session alive.
    pub fn evict_if_idle(
        &self,
        id: ClientId,
        now: Instant,
        timeout: Duration,
    ) -> Option<Arc<ClientSession>> {
        let mut maps = self.inner.write();

        let idle = {
            let session = maps.by_id.get(&id)?;
            let state = session.lock();
            state.is_idle(now, timeout)
        };

        if idle {
            maps.remove(id)
        } else {
            None
        }
    }

    /// Load persisted sessions at startup
    ///
    /// Records are expected newest first; a later record whose name or id is
    /// already present is skipped.
    pub fn restore(&self, records: &[SessionRecord]) -> usize {
        let mut maps = self.inner.write();
        let mut restored = 0;

        for record in records {
            if let Err(e) = validate_name(&record.name) {
                tracing::warn!(client_id = %record.id, error = %e, "Skipping stored session");
                continue;
            }
            if maps.by_id.contains_key(&record.id) || maps.by_name.contains_key(&record.name) {
                tracing::warn!(
                    client_id = %record.id,
                    name = %record.name,
                    "Skipping shadowed stored session"
                );
                continue;
            }

            maps.insert(Arc::new(ClientSession::from_record(record)));
            restored += 1;
        }

        restored
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    pub fn find_by_id(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<ClientSession>> {
        let maps = self.inner.read();
        maps.by_name
            .get(name)
            .and_then(|id| maps.by_id.get(id))
            .cloned()
    }

    /// Copy out every session handle without holding the lock afterwards
    pub fn snapshot_all(&self) -> Vec<Arc<ClientSession>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

pub fn validate_name(name: &str) -> Result<(), SessionError> {
    if name.is_empty() {
        return Err(SessionError::InvalidName("empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(SessionError::InvalidName(format!(
            "{} bytes (max: {})",
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(SessionError::InvalidName("embedded NUL".to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
