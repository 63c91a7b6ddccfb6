//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Registered clients
CREATE TABLE IF NOT EXISTS clients (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    -- X.509 DER, 160 bytes
    public_key BLOB,
    -- AES-256, 32 bytes
    aes_key BLOB,
    last_seen TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_clients_name ON clients(name);
CREATE INDEX IF NOT EXISTS idx_clients_last_seen ON clients(last_seen);

-- Files received from clients, verified or abandoned
CREATE TABLE IF NOT EXISTS files (
    client_id BLOB NOT NULL,
    file_name TEXT NOT NULL,
    path_name TEXT,
    verified INTEGER NOT NULL DEFAULT 0,
    size INTEGER NOT NULL,
    mtime TEXT NOT NULL,
    crc INTEGER NOT NULL,

    PRIMARY KEY (client_id, file_name)
);

CREATE INDEX IF NOT EXISTS idx_files_verified ON files(verified);
"#;
