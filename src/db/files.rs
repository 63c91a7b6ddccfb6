//! File repository

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::CompletedFileRecord;

use super::{format_timestamp, parse_timestamp};

/// Row as stored in the `files` table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRow {
    pub client_id: Vec<u8>,
    pub file_name: String,
    pub path_name: Option<String>,
    pub verified: bool,
    pub size: i64,
    pub mtime: String,
    pub crc: i64,
}

impl FileRow {
    pub fn into_record(self) -> Result<CompletedFileRecord> {
        let client_id = Uuid::from_slice(&self.client_id).map_err(|e| {
            AppError::CorruptRecord(format!("client id for file {:?}: {e}", self.file_name))
        })?;
        let crc = u32::try_from(self.crc)
            .map_err(|_| AppError::CorruptRecord(format!("crc {} out of range", self.crc)))?;

        Ok(CompletedFileRecord {
            client_id,
            file_name: self.file_name,
            path: self.path_name.map(Into::into),
            verified: self.verified,
            size: self.size.max(0) as u64,
            mtime: parse_timestamp(&self.mtime)?,
            crc,
        })
    }
}

/// Repository for backed-up file records
pub struct FileRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> FileRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Record the outcome of a transfer, replacing any earlier outcome for the same name
    pub async fn upsert(&self, record: &CompletedFileRecord) -> Result<()> {
        let path = record.path.as_ref().map(|p| p.to_string_lossy().into_owned());

        sqlx::query(
            r#"
            INSERT INTO files (client_id, file_name, path_name, verified, size, mtime, crc)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(client_id, file_name) DO UPDATE SET
                path_name = excluded.path_name,
                verified = excluded.verified,
                size = excluded.size,
                mtime = excluded.mtime,
                crc = excluded.crc
            "#,
        )
        .bind(record.client_id.as_bytes().as_slice())
        .bind(&record.file_name)
        .bind(path)
        .bind(record.verified)
        .bind(i64::try_from(record.size).unwrap_or(i64::MAX))
        .bind(format_timestamp(&record.mtime))
        .bind(i64::from(record.crc))
        .execute(self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, client_id: Uuid, file_name: &str) -> Result<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT client_id, file_name, path_name, verified, size, mtime, crc
            FROM files
            WHERE client_id = ? AND file_name = ?
            "#,
        )
        .bind(client_id.as_bytes().as_slice())
        .bind(file_name)
        .fetch_optional(self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_for_client(&self, client_id: Uuid) -> Result<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(
            r#"
            SELECT client_id, file_name, path_name, verified, size, mtime, crc
            FROM files
            WHERE client_id = ?
            ORDER BY mtime DESC
            "#,
        )
        .bind(client_id.as_bytes().as_slice())
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }
}
