use crate::error::StoreError;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Byte-keyed key/value store rooted at a directory, one file per key.
///
/// Keys are relative slash-separated paths (`sandbox/sb_x`). Writes go
/// through a temp file and a rename, so a single key is always either the
/// old bytes or the new bytes, never a torn write. There is no cross-key
/// atomicity.
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a subdirectory under the root so that keys with that prefix
    /// can be written without per-write parent checks.
    pub async fn ensure_subdir(&self, name: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(name)).await?;
        Ok(())
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        // Reject anything that could escape the root.
        let ok = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !ok {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.key_path(key)?;
        match fs::read(&path).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Appended rather than with_extension: keys may contain dots.
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn erase(&self, key: &str) -> Result<(), StoreError> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// File names of every stored key, walked recursively. Only the final
    /// path component is reported; callers filter by name prefix.
    pub async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                let name = entry.file_name().to_string_lossy().to_string();
                if name.ends_with(".tmp") {
                    continue;
                }
                names.push(name);
            }
        }

        Ok(names)
    }
}
