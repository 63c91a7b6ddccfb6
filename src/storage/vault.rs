//! File Vault
//!
//! Writes verified file contents under `<backup_dir>/<client id>/<file name>`.
//! Contents land in a hidden temporary file first and are renamed into place,
//! so a reader never sees a half-written backup.

use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::session::ClientId;

#[derive(Debug, Clone)]
pub struct FileVault {
    base_path: PathBuf,
}

impl FileVault {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Final location of `file_name` for `client_id`
    pub fn path_for(&self, client_id: ClientId, file_name: &str) -> Result<PathBuf> {
        let name = storage_name(file_name)?;
        Ok(self.client_dir(client_id).join(name))
    }

    /// Write `content`, replacing any earlier backup of the same name
    pub async fn store(
        &self,
        client_id: ClientId,
        file_name: &str,
        content: &[u8],
    ) -> Result<PathBuf> {
        let name = storage_name(file_name)?;
        let dir = self.client_dir(client_id);
        tokio::fs::create_dir_all(&dir).await?;

        let final_path = dir.join(name);
        let temp_path = dir.join(format!(".{name}.partial"));

        if let Err(e) = tokio::fs::write(&temp_path, content).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp_path, &final_path).await?;

        tracing::debug!(
            client_id = %client_id,
            path = %final_path.display(),
            bytes = content.len(),
            "Stored backup file"
        );

        Ok(final_path)
    }

    pub async fn read(&self, client_id: ClientId, file_name: &str) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(self.path_for(client_id, file_name)?).await?)
    }

    fn client_dir(&self, client_id: ClientId) -> PathBuf {
        self.base_path.join(client_id.simple().to_string())
    }
}

/// Last path component of a client-supplied name
///
/// Clients may send full paths with either separator; only the final
/// component is kept, and it must be a plain, visible file name.
fn storage_name(file_name: &str) -> Result<&str> {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('\0');

    if name.is_empty()
        || name == "."
        || name == ".."
        || name.starts_with('.')
        || name.contains(':')
    {
        return Err(AppError::InvalidStoragePath(file_name.to_string()));
    }

    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_store_and_read() {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::new(dir.path());
        let id = Uuid::new_v4();

        let path = vault.store(id, "report.pdf", b"contents").await.unwrap();

        assert_eq!(path, dir.path().join(id.simple().to_string()).join("report.pdf"));
        assert_eq!(vault.read(id, "report.pdf").await.unwrap(), b"contents");
    }

    #[tokio::test]
    async fn test_store_replaces_previous_version() {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::new(dir.path());
        let id = Uuid::new_v4();

        vault.store(id, "a.txt", b"first").await.unwrap();
        vault.store(id, "a.txt", b"second").await.unwrap();

        assert_eq!(vault.read(id, "a.txt").await.unwrap(), b"second");

        let entries: Vec<_> = std::fs::read_dir(dir.path().join(id.simple().to_string()))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_clients_are_isolated() {
        let dir = TempDir::new().unwrap();
        let vault = FileVault::new(dir.path());
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        vault.store(a, "same.txt", b"from a").await.unwrap();
        vault.store(b, "same.txt", b"from b").await.unwrap();

        assert_eq!(vault.read(a, "same.txt").await.unwrap(), b"from a");
        assert_eq!(vault.read(b, "same.txt").await.unwrap(), b"from b");
    }

    #[test]
    fn test_storage_name_strips_directories() {
        assert_eq!(storage_name("C:\\Users\\me\\notes.txt").unwrap(), "notes.txt");
        assert_eq!(storage_name("/etc/../../passwd").unwrap(), "passwd");
        assert_eq!(storage_name("plain.bin").unwrap(), "plain.bin");
    }

    #[test]
    fn test_storage_name_rejects_traversal() {
        for bad in ["", "..", "dir/..", "dir/", ".hidden", "x\\.", "c:"] {
            assert!(
                matches!(storage_name(bad), Err(AppError::InvalidStoragePath(_))),
                "accepted {bad:?}"
            );
        }
    }
}
