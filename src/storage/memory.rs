use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::Result;
use crate::session::ClientId;

use super::{CompletedFileRecord, Persistence, SessionRecord};

/// In-process persistence, used by tests and when no database is wanted
#[derive(Default)]
pub struct MemoryPersistence {
    sessions: Mutex<HashMap<ClientId, SessionRecord>>,
    files: Mutex<Vec<CompletedFileRecord>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self, id: ClientId) -> Option<SessionRecord> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn files(&self) -> Vec<CompletedFileRecord> {
        self.files.lock().clone()
    }
}

#[async_trait::async_trait]
impl Persistence for MemoryPersistence {
    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<_> = self.sessions.lock().values().cloned().collect();
        records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(records)
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<()> {
        self.sessions.lock().insert(record.id, record.clone());
        Ok(())
    }

    async fn save_completed_file(&self, record: &CompletedFileRecord) -> Result<()> {
        let mut files = self.files.lock();
        files.retain(|f| !(f.client_id == record.client_id && f.file_name == record.file_name));
        files.push(record.clone());
        Ok(())
    }
}
