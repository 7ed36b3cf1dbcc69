//! File-backed store.
//!
//! One JSON file per key:
//! ```text
//! <DATA_DIR>/
//!   <key>.json    {"value": ..., "metadata": {"updateAt": ...}}
//! ```
//!
//! Writes go to a temp file that is renamed into place, so readers never
//! observe a half-written entry.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

use super::{KvStore, Metadata, StoreError, StoredEntry};

const ENTRY_EXTENSION: &str = "json";

/// Distinguishes temp files of concurrent writers to the same key.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Rejects keys that would resolve outside the data directory.
    fn validate_key(key: &str) -> Result<(), StoreError> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key.contains("..")
            || key.starts_with('.')
            || key.contains('\0')
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{key}.{ENTRY_EXTENSION}"))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.data_dir
            .join(format!(".{key}.{}.{n}.tmp", std::process::id()))
    }

    /// Writes `bytes` to `temp_path` and renames it over `path`.
    /// The temp file is removed if either step fails.
    async fn replace_with(temp_path: &Path, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Err(e) = fs::write(temp_path, bytes).await {
            let _ = fs::remove_file(temp_path).await;
            return Err(StoreError::Io(temp_path.to_path_buf(), e));
        }

        if let Err(e) = fs::rename(temp_path, path).await {
            let _ = fs::remove_file(temp_path).await;
            return Err(StoreError::Io(path.to_path_buf(), e));
        }

        Ok(())
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get_with_metadata(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        Self::validate_key(key)?;
        let path = self.entry_path(key);

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(path, e)),
        };

        let entry = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(path, e))?;
        Ok(Some(entry))
    }

    async fn put(&self, key: &str, value: &Value, metadata: Metadata) -> Result<(), StoreError> {
        Self::validate_key(key)?;

        fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StoreError::Io(self.data_dir.clone(), e))?;

        let entry = StoredEntry {
            value: value.clone(),
            metadata,
        };
        let bytes = serde_json::to_vec_pretty(&entry).map_err(StoreError::Encode)?;

        Self::replace_with(&self.temp_path(key), &self.entry_path(key), &bytes).await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut dir = match fs::read_dir(&self.data_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(self.data_dir.clone(), e)),
        };

        let mut keys = Vec::new();
        loop {
            let next = dir
                .next_entry()
                .await
                .map_err(|e| StoreError::Io(self.data_dir.clone(), e))?;
            let Some(entry) = next else { break };

            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) {
                keys.push(key.to_string());
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (FileStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("data"));
        (store, temp_dir)
    }

    #[test]
    fn test_validate_key() {
        assert!(FileStore::validate_key("kvsync-rules").is_ok());
        assert!(FileStore::validate_key("user_42.settings").is_ok());

        assert!(FileStore::validate_key("").is_err());
        assert!(FileStore::validate_key("../evil").is_err());
        assert!(FileStore::validate_key("foo/bar").is_err());
        assert!(FileStore::validate_key("foo\\bar").is_err());
        assert!(FileStore::validate_key(".hidden").is_err());
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, _temp) = setup();
        assert!(store.get_with_metadata("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_creates_dir_and_file() {
        let (store, temp) = setup();
        store
            .put("a", &json!({"x": 1}), Metadata { update_at: 100 })
            .await
            .unwrap();

        let path = temp.path().join("data").join("a.json");
        assert!(path.exists());

        let entry = store.get_with_metadata("a").await.unwrap().unwrap();
        assert_eq!(entry.value, json!({"x": 1}));
        assert_eq!(entry.metadata.update_at, 100);
    }

    #[tokio::test]
    async fn test_on_disk_format() {
        let (store, temp) = setup();
        store
            .put("a", &json!("v"), Metadata { update_at: 5 })
            .await
            .unwrap();

        let raw = std::fs::read_to_string(temp.path().join("data").join("a.json")).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, json!({"value": "v", "metadata": {"updateAt": 5}}));
    }

    #[tokio::test]
    async fn test_overwrite_existing() {
        let (store, _temp) = setup();
        store
            .put("a", &json!(1), Metadata { update_at: 1 })
            .await
            .unwrap();
        store
            .put("a", &json!(2), Metadata { update_at: 2 })
            .await
            .unwrap();

        let entry = store.get_with_metadata("a").await.unwrap().unwrap();
        assert_eq!(entry.value, json!(2));
        assert_eq!(store.list().await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_io() {
        let (store, temp) = setup();
        let err = store
            .put("../escape", &json!(1), Metadata { update_at: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
        assert!(!temp.path().join("data").exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry() {
        let (store, temp) = setup();
        let dir = temp.path().join("data");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("bad.json"), b"{not json").unwrap();

        let err = store.get_with_metadata("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_, _)));
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_foreign_files() {
        let (store, temp) = setup();
        store
            .put("b", &json!(1), Metadata { update_at: 1 })
            .await
            .unwrap();
        store
            .put("a", &json!(1), Metadata { update_at: 1 })
            .await
            .unwrap();

        let dir = temp.path().join("data");
        std::fs::write(dir.join(".c.1.0.tmp"), b"{}").unwrap();
        std::fs::write(dir.join("notes.txt"), b"hi").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_write_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        // Writing through a dangling link fails after the temp entry exists.
        let temp_path = temp.path().join(".a.tmp");
        std::os::unix::fs::symlink(temp.path().join("missing/a"), &temp_path).unwrap();

        let err = FileStore::replace_with(&temp_path, &temp.path().join("a.json"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_, _)));
        assert!(std::fs::symlink_metadata(&temp_path).is_err());
        assert!(!temp.path().join("a.json").exists());
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        let temp_path = temp.path().join(".a.tmp");

        let err = FileStore::replace_with(&temp_path, &temp.path().join("missing/a.json"), b"{}")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_, _)));
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_list_without_dir_is_empty() {
        let (store, _temp) = setup();
        assert!(store.list().await.unwrap().is_empty());
    }
}
