use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed blob store. Keys are relative paths under the
/// configured root; anything escaping the root is rejected.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage root {}", root.display()))?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create storage directory")?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write object {key}"))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object {key}"))?;
        Ok(bytes)
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to delete object {key}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        storage
            .put_object("reports/a.txt", b"hello".to_vec())
            .await
            .unwrap();
        assert_eq!(storage.get_object("reports/a.txt").await.unwrap(), b"hello");

        storage.delete_object("reports/a.txt").await.unwrap();
        assert!(storage.get_object("reports/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn deleting_missing_object_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        storage.delete_object("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_keys_escaping_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();
        assert!(storage
            .put_object("../outside", b"nope".to_vec())
            .await
            .is_err());
        assert!(storage.get_object("/etc/passwd").await.is_err());
    }
}
