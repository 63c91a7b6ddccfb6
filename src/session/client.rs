//! Client Session
//!
//! Per-client key material, activity clock and in-flight transfers. Every
//! field lives behind the session's own mutex; callers that need several
//! steps to happen atomically take [`ClientSession::lock`] once and work on
//! the [`SessionState`] guard.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};

use crate::crypto::PublicKey;
use crate::storage::SessionRecord;

use super::transfer::TransferTable;
use super::types::{ClientId, CryptoState, SessionError, AES_KEY_LEN, PUBLIC_KEY_LEN};

// ============================================================================
// Session State
// ============================================================================

/// Mutable half of a session, only reachable through the session lock
#[derive(Debug)]
pub struct SessionState {
    public_key_der: Option<Vec<u8>>,
    public_key: Option<PublicKey>,
    aes_key: Option<[u8; AES_KEY_LEN]>,
    last_seen: Instant,
    /// Wall-clock mirror of `last_seen`, for persistence and display only
    last_seen_at: DateTime<Utc>,
    transfers: TransferTable,
}

impl SessionState {
    fn new() -> Self {
        Self {
            public_key_der: None,
            public_key: None,
            aes_key: None,
            last_seen: Instant::now(),
            last_seen_at: Utc::now(),
            transfers: TransferTable::new(),
        }
    }

    /// Store the client's RSA public key
    ///
    /// The raw bytes and the parsed key are replaced together, and only if the
    /// bytes parse as a 1024-bit X.509 RSA key.
    pub fn set_public_key(&mut self, der: &[u8]) -> Result<&PublicKey, SessionError> {
        if der.len() != PUBLIC_KEY_LEN {
            return Err(SessionError::InvalidPublicKeyLength(der.len()));
        }

        let parsed =
            PublicKey::from_der(der).map_err(|e| SessionError::InvalidPublicKey(e.to_string()))?;

        self.public_key_der = Some(der.to_vec());
        Ok(self.public_key.insert(parsed))
    }

    /// Install a new AES session key, replacing any previous one
    ///
    /// Packets already buffered were encrypted under the old key, so replacing
    /// a key drops every transfer that has not been sealed. Returns how many
    /// were dropped.
    pub fn set_aes_key(&mut self, key: &[u8]) -> Result<usize, SessionError> {
        let key: [u8; AES_KEY_LEN] = key
            .try_into()
            .map_err(|_| SessionError::InvalidAesKeyLength(key.len()))?;
        let dropped = match self.aes_key.replace(key) {
            Some(_) => self.transfers.clear_unsealed(),
            None => 0,
        };
        Ok(dropped)
    }

    pub fn update_last_seen(&mut self) {
        self.last_seen = Instant::now();
        self.last_seen_at = Utc::now();
    }

    pub fn crypto_state(&self) -> CryptoState {
        match (&self.public_key, &self.aes_key) {
            (Some(_), Some(_)) => CryptoState::HasSessionKey,
            (Some(_), None) => CryptoState::HasPublicKey,
            (None, _) => CryptoState::NoKey,
        }
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    pub fn public_key_der(&self) -> Option<&[u8]> {
        self.public_key_der.as_deref()
    }

    pub fn aes_key(&self) -> Option<&[u8; AES_KEY_LEN]> {
        self.aes_key.as_ref()
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn last_seen_at(&self) -> DateTime<Utc> {
        self.last_seen_at
    }

    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }

    pub fn transfers(&self) -> &TransferTable {
        &self.transfers
    }

    pub fn transfers_mut(&mut self) -> &mut TransferTable {
        &mut self.transfers
    }
}

// ============================================================================
// Client Session
// ============================================================================

/// Server-side state of one registered client
#[derive(Debug)]
pub struct ClientSession {
    id: ClientId,
    name: String,
    state: Mutex<SessionState>,
}

impl ClientSession {
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: Mutex::new(SessionState::new()),
        }
    }

    /// Rebuild a session from a persisted record
    ///
    /// A stored public key that no longer parses is dropped with a warning so
    /// the client falls back to re-sending it. The AES key is never restored;
    /// reconnecting issues a fresh one.
    pub fn from_record(record: &SessionRecord) -> Self {
        let session = Self::new(record.id, record.name.clone());

        if let Some(der) = &record.public_key {
            let mut state = session.state.lock();
            if let Err(e) = state.set_public_key(der) {
                tracing::warn!(
                    client_id = %record.id,
                    name = %record.name,
                    error = %e,
                    "Discarding unusable stored public key"
                );
            }
        }

        session
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquire the session lock
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn set_public_key(&self, der: &[u8]) -> Result<PublicKey, SessionError> {
        self.lock().set_public_key(der).cloned()
    }

    pub fn set_aes_key(&self, key: &[u8]) -> Result<usize, SessionError> {
        self.lock().set_aes_key(key)
    }

    pub fn update_last_seen(&self) {
        self.lock().update_last_seen();
    }

    pub fn crypto_state(&self) -> CryptoState {
        self.lock().crypto_state()
    }

    pub fn sweep_stale(&self, now: Instant, timeout: Duration) -> usize {
        self.lock().transfers_mut().sweep_stale(now, timeout)
    }

    pub fn transfer_count(&self) -> usize {
        self.lock().transfers().len()
    }

    /// Snapshot for the persistence layer
    pub fn record(&self) -> SessionRecord {
        let state = self.lock();
        SessionRecord {
            id: self.id,
            name: self.name.clone(),
            public_key: state.public_key_der.clone(),
            aes_key: state.aes_key.map(|key| key.to_vec()),
            last_seen: state.last_seen_at,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
