use sqlx::SqlitePool;

use crate::db::{ClientRepository, FileRepository};
use crate::error::Result;

use super::{CompletedFileRecord, Persistence, SessionRecord};

/// SQLite-backed persistence
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn load_all_sessions(&self) -> Result<Vec<SessionRecord>> {
        ClientRepository::new(&self.pool)
            .list()
            .await?
            .into_iter()
            .map(|row| row.into_record())
            .collect()
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<()> {
        ClientRepository::new(&self.pool).upsert(record).await
    }

    async fn save_completed_file(&self, record: &CompletedFileRecord) -> Result<()> {
        FileRepository::new(&self.pool).upsert(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;
    use uuid::Uuid;

    async fn persistence(dir: &TempDir) -> SqlitePersistence {
        let url = format!("sqlite:{}", dir.path().join("test.db").display());
        SqlitePersistence::new(create_pool(&url).await.unwrap())
    }

    fn record(name: &str, age_minutes: i64) -> SessionRecord {
        SessionRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            public_key: Some(vec![0x30; 160]),
            aes_key: None,
            last_seen: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn test_sessions_load_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = persistence(&dir).await;

        let old = record("old", 120);
        let new = record("new", 1);
        let mid = record("mid", 30);
        for r in [&old, &new, &mid] {
            store.save_session(r).await.unwrap();
        }

        let loaded = store.load_all_sessions().await.unwrap();
        let names: Vec<_> = loaded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["new", "mid", "old"]);
        assert_eq!(loaded[0].id, new.id);
        assert_eq!(loaded[0].public_key, new.public_key);
    }

    #[tokio::test]
    async fn test_save_session_updates_in_place() {
        let dir = TempDir::new().unwrap();
        let store = persistence(&dir).await;

        let mut r = record("alice", 10);
        store.save_session(&r).await.unwrap();

        r.aes_key = Some(vec![1u8; 32]);
        r.last_seen = Utc::now();
        store.save_session(&r).await.unwrap();

        let loaded = store.load_all_sessions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].aes_key, Some(vec![1u8; 32]));
        assert_eq!(ClientRepository::new(store.pool()).count().await.unwrap(), 1);

        let row = ClientRepository::new(store.pool()).get(r.id).await.unwrap().unwrap();
        assert_eq!(row.into_record().unwrap(), loaded[0]);
    }

    #[tokio::test]
    async fn test_completed_file_upsert() {
        let dir = TempDir::new().unwrap();
        let store = persistence(&dir).await;
        let client_id = Uuid::new_v4();

        let mut file = CompletedFileRecord {
            client_id,
            file_name: "notes.txt".to_string(),
            path: None,
            verified: false,
            size: 11,
            mtime: Utc::now(),
            crc: 0xDEAD_BEEF,
        };
        store.save_completed_file(&file).await.unwrap();

        file.verified = true;
        file.path = Some("/backup/notes.txt".into());
        store.save_completed_file(&file).await.unwrap();

        let rows = FileRepository::new(store.pool())
            .list_for_client(client_id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let stored = rows.into_iter().next().unwrap().into_record().unwrap();
        let fetched = FileRepository::new(store.pool())
            .get(client_id, "notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.into_record().unwrap(), stored);
        assert!(stored.verified);
        assert_eq!(stored.crc, 0xDEAD_BEEF);
        assert_eq!(stored.path, file.path);
    }
}
