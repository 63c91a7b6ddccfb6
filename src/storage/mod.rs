//! Storage
//!
//! Durable state behind the protocol handler:
//! - Client records and file outcomes (SQLite, or in-memory for tests)
//! - The backup directory holding verified file contents

mod memory;
mod sqlite;
mod vault;

pub use memory::MemoryPersistence;
pub use sqlite::SqlitePersistence;
pub use vault::FileVault;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::session::ClientId;

// ============================================================================
// Records
// ============================================================================

/// Persisted view of a client session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: ClientId,
    pub name: String,
    /// X.509 DER as received, if the client ever sent one
    pub public_key: Option<Vec<u8>>,
    pub aes_key: Option<Vec<u8>>,
    pub last_seen: DateTime<Utc>,
}

/// Outcome of one file transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedFileRecord {
    pub client_id: ClientId,
    pub file_name: String,
    /// Where the vault wrote the contents; `None` for abandoned transfers
    pub path: Option<PathBuf>,
    pub verified: bool,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub crc: u32,
}

// ============================================================================
// Persistence Trait
// ============================================================================

/// Persistence collaborator used by the request handler and at startup
#[async_trait::async_trait]
pub trait Persistence: Send + Sync {
    /// Every stored session, most recently seen first
    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>>;

    async fn save_session(&self, record: &SessionRecord) -> Result<()>;

    async fn save_completed_file(&self, record: &CompletedFileRecord) -> Result<()>;
}
