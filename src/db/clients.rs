//! Client repository

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::SessionRecord;

use super::{format_timestamp, parse_timestamp};

/// Row as stored in the `clients` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClientRow {
    pub id: Vec<u8>,
    pub name: String,
    pub public_key: Option<Vec<u8>>,
    pub aes_key: Option<Vec<u8>>,
    pub last_seen: String,
}

impl ClientRow {
    pub fn into_record(self) -> Result<SessionRecord> {
        let id = Uuid::from_slice(&self.id)
            .map_err(|e| AppError::CorruptRecord(format!("client id for {:?}: {e}", self.name)))?;

        Ok(SessionRecord {
            id,
            name: self.name,
            public_key: self.public_key,
            aes_key: self.aes_key,
            last_seen: parse_timestamp(&self.last_seen)?,
        })
    }
}

/// Repository for client records
pub struct ClientRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ClientRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// All clients, most recently seen first
    pub async fn list(&self) -> Result<Vec<ClientRow>> {
        let rows = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT id, name, public_key, aes_key, last_seen
            FROM clients
            ORDER BY last_seen DESC
            "#,
        )
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ClientRow>> {
        let row = sqlx::query_as::<_, ClientRow>(
            r#"
            SELECT id, name, public_key, aes_key, last_seen
            FROM clients
            WHERE id = ?
            "#,
        )
        .bind(id.as_bytes().as_slice())
        .fetch_optional(self.pool)
        .await?;

        Ok(row)
    }

    /// Insert or replace a client record
    pub async fn upsert(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clients (id, name, public_key, aes_key, last_seen)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                public_key = excluded.public_key,
                aes_key = excluded.aes_key,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(record.id.as_bytes().as_slice())
        .bind(&record.name)
        .bind(record.public_key.as_deref())
        .bind(record.aes_key.as_deref())
        .bind(format_timestamp(&record.last_seen))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM clients")
            .fetch_one(self.pool)
            .await?;

        Ok(count.0)
    }
}
