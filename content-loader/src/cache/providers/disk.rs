//! On-disk storage backend.
//!
//! # File Layout
//!
//! ```text
//! {root}/{cache_name}/VERSION
//! {root}/{cache_name}/metadata/{key_hash}.json
//! {root}/{cache_name}/filedata/{key_hash}.bin
//! ```
//!
//! Keys are hashed with SHA-256 to produce safe filenames on every platform.
//!
//! # Atomic Writes
//!
//! Both files are staged under temporary names first. The payload is renamed
//! into place before the metadata row; if the metadata rename fails the
//! payload is removed again. Reads require the metadata row, so a payload is
//! never visible without it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::cache::record::CacheRecord;
use crate::cache::traits::{
    BoxFuture, CacheError, CacheResult, OpenOutcome, StorageBackend, StorageFactory,
    SCHEMA_VERSION,
};

const VERSION_FILE: &str = "VERSION";
const METADATA_DIR: &str = "metadata";
const FILEDATA_DIR: &str = "filedata";

/// Factory for disk-backed stores under a root directory.
#[derive(Debug, Clone)]
pub struct DiskBackendFactory {
    root: PathBuf,
}

impl DiskBackendFactory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the store called `name`.
    pub fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(sanitize_name(name))
    }
}

/// Map a cache name to a directory name.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{}", cleaned)
    } else {
        cleaned
    }
}

fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn read_version(dir: &Path) -> CacheResult<Option<u32>> {
    match tokio::fs::read_to_string(dir.join(VERSION_FILE)).await {
        Ok(text) => Ok(text.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CacheError::Io(e)),
    }
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl StorageFactory for DiskBackendFactory {
    fn open(&self, name: &str) -> BoxFuture<'_, CacheResult<OpenOutcome>> {
        let name = name.to_string();
        let dir = self.store_dir(&name);
        Box::pin(async move {
            tokio::fs::create_dir_all(&dir).await?;
            let schema_version = read_version(&dir).await?;
            debug!(cache = %name, dir = %dir.display(), ?schema_version, "opened disk store");

            let backend: Arc<dyn StorageBackend> = Arc::new(DiskBackend {
                name,
                dir,
                closed: AtomicBool::new(false),
                staging_counter: AtomicU64::new(0),
            });
            Ok(OpenOutcome {
                backend,
                schema_version,
            })
        })
    }

    fn destroy(&self, name: &str) -> BoxFuture<'_, CacheResult<()>> {
        let name = name.to_string();
        let dir = self.store_dir(&name);
        Box::pin(async move {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    info!(cache = %name, dir = %dir.display(), "deleted disk store");
                    Ok(())
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CacheError::Io(e)),
            }
        })
    }
}

/// Handle to one on-disk store.
pub struct DiskBackend {
    name: String,
    dir: PathBuf,
    closed: AtomicBool,
    staging_counter: AtomicU64,
}

impl DiskBackend {
    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn metadata_path(&self, hash: &str) -> PathBuf {
        self.dir.join(METADATA_DIR).join(format!("{}.json", hash))
    }

    fn filedata_path(&self, hash: &str) -> PathBuf {
        self.dir.join(FILEDATA_DIR).join(format!("{}.bin", hash))
    }

    fn staging_suffix(&self) -> String {
        format!(
            "tmp{}-{}",
            std::process::id(),
            self.staging_counter.fetch_add(1, Ordering::Relaxed)
        )
    }

    async fn read_metadata(&self, key: &str) -> CacheResult<Option<CacheRecord>> {
        let path = self.metadata_path(&key_hash(key));
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::Io(e)),
        }
    }

    async fn commit(&self, record: &CacheRecord, data: &[u8]) -> CacheResult<()> {
        let hash = key_hash(&record.key);
        let data_path = self.filedata_path(&hash);
        let meta_path = self.metadata_path(&hash);
        let suffix = self.staging_suffix();
        let data_tmp = data_path.with_extension(&suffix);
        let meta_tmp = meta_path.with_extension(&suffix);

        let staged = async {
            tokio::fs::write(&data_tmp, data).await?;
            tokio::fs::write(&meta_tmp, serde_json::to_vec(record)?).await?;
            Ok::<(), CacheError>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = remove_if_exists(&data_tmp).await;
            let _ = remove_if_exists(&meta_tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&data_tmp, &data_path).await {
            let _ = remove_if_exists(&data_tmp).await;
            let _ = remove_if_exists(&meta_tmp).await;
            return Err(CacheError::Io(e));
        }

        if let Err(e) = tokio::fs::rename(&meta_tmp, &meta_path).await {
            warn!(key = %record.key, error = %e, "metadata commit failed, rolling back");
            let _ = remove_if_exists(&data_path).await;
            let _ = remove_if_exists(&meta_tmp).await;
            let _ = remove_if_exists(&meta_path).await;
            return Err(CacheError::Io(e));
        }

        Ok(())
    }
}

impl StorageBackend for DiskBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<Bytes>>> {
        let key = key.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            if self.read_metadata(&key).await?.is_none() {
                return Ok(None);
            }
            match tokio::fs::read(self.filedata_path(&key_hash(&key))).await {
                Ok(data) => Ok(Some(Bytes::from(data))),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CacheError::Io(e)),
            }
        })
    }

    fn read_record(&self, key: &str) -> BoxFuture<'_, CacheResult<Option<CacheRecord>>> {
        let key = key.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            self.read_metadata(&key).await
        })
    }

    fn write(&self, record: CacheRecord, data: Bytes) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.commit(&record, &data).await
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, CacheResult<bool>> {
        let key = key.to_string();
        Box::pin(async move {
            self.ensure_open()?;
            let hash = key_hash(&key);
            let had_data = remove_if_exists(&self.filedata_path(&hash)).await?;
            let had_meta = remove_if_exists(&self.metadata_path(&hash)).await?;
            Ok(had_data || had_meta)
        })
    }

    fn keys(&self) -> BoxFuture<'_, CacheResult<Vec<String>>> {
        Box::pin(async move {
            self.ensure_open()?;
            let mut keys = Vec::new();
            let mut dir = match tokio::fs::read_dir(self.dir.join(METADATA_DIR)).await {
                Ok(dir) => dir,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(keys),
                Err(e) => return Err(CacheError::Io(e)),
            };
            let mut reads = FuturesUnordered::new();
            while let Some(entry) = dir.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                reads.push(async move {
                    let raw = tokio::fs::read(&path).await;
                    (path, raw)
                });
            }
            while let Some((path, raw)) = reads.next().await {
                match serde_json::from_slice::<CacheRecord>(&raw?) {
                    Ok(record) => keys.push(record.key),
                    Err(e) => warn!(path = %path.display(), error = %e, "unreadable metadata row"),
                }
            }
            keys.sort();
            Ok(keys)
        })
    }

    fn create_tables(&self) -> BoxFuture<'_, CacheResult<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            for table in [METADATA_DIR, FILEDATA_DIR] {
                let path = self.dir.join(table);
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::Io(e)),
                }
                tokio::fs::create_dir_all(&path).await?;
            }
            tokio::fs::write(self.dir.join(VERSION_FILE), SCHEMA_VERSION.to_string()).await?;
            info!(cache = %self.name, version = SCHEMA_VERSION, "created disk tables");
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_fresh(factory: &DiskBackendFactory, name: &str) -> Arc<dyn StorageBackend> {
        let outcome = factory.open(name).await.unwrap();
        if outcome.schema_version != Some(SCHEMA_VERSION) {
            outcome.backend.create_tables().await.unwrap();
        }
        outcome.backend
    }

    #[test]
    fn test_key_hash_deterministic() {
        assert_eq!(key_hash("a"), key_hash("a"));
        assert_ne!(key_hash("a"), key_hash("b"));
        assert_eq!(key_hash("a").len(), 64);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("game-1.0"), "game-1.0");
        assert_eq!(sanitize_name("a/b c"), "a_b_c");
        assert_eq!(sanitize_name(".."), "_..");
        assert_eq!(sanitize_name(""), "_");
    }

    #[tokio::test]
    async fn test_version_file_written() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());

        let outcome = factory.open("game").await.unwrap();
        assert_eq!(outcome.schema_version, None);
        outcome.backend.create_tables().await.unwrap();

        let again = factory.open("game").await.unwrap();
        assert_eq!(again.schema_version, Some(SCHEMA_VERSION));
    }

    #[tokio::test]
    async fn test_round_trip() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());
        let backend = open_fresh(&factory, "game").await;

        let data = Bytes::from(vec![9u8; 1500]);
        backend
            .write(CacheRecord::new("core.package", "bytes", 1500), data.clone())
            .await
            .unwrap();

        assert_eq!(backend.read("core.package").await.unwrap(), Some(data));
        let record = backend.read_record("core.package").await.unwrap().unwrap();
        assert_eq!(record.size, 1500);
        assert_eq!(backend.keys().await.unwrap(), vec!["core.package".to_string()]);
    }

    #[tokio::test]
    async fn test_payload_without_metadata_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());
        let backend = open_fresh(&factory, "game").await;

        let stray = factory
            .store_dir("game")
            .join(FILEDATA_DIR)
            .join(format!("{}.bin", key_hash("k")));
        tokio::fs::write(&stray, b"orphan").await.unwrap();

        assert!(backend.read("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());
        let backend = open_fresh(&factory, "game").await;

        // Removing the metadata table makes staging fail after the payload
        tokio::fs::remove_dir_all(factory.store_dir("game").join(METADATA_DIR))
            .await
            .unwrap();
        let result = backend
            .write(CacheRecord::new("k", "bytes", 3), Bytes::from_static(b"abc"))
            .await;
        assert!(result.is_err());

        let mut entries = tokio::fs::read_dir(factory.store_dir("game").join(FILEDATA_DIR))
            .await
            .unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schema_recreate_clears_tables() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());
        let backend = open_fresh(&factory, "game").await;
        backend
            .write(CacheRecord::new("k", "bytes", 1), Bytes::from_static(b"x"))
            .await
            .unwrap();

        backend.create_tables().await.unwrap();
        assert!(backend.read("k").await.unwrap().is_none());
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_and_closed_handle() {
        let temp = TempDir::new().unwrap();
        let factory = DiskBackendFactory::new(temp.path());
        let backend = open_fresh(&factory, "game").await;
        backend.close().await;
        assert!(matches!(backend.read("k").await, Err(CacheError::Closed)));

        factory.destroy("game").await.unwrap();
        assert!(!factory.store_dir("game").exists());
        factory.destroy("game").await.unwrap();
    }
}
