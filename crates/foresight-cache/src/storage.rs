//! Persistent key-value backends for the cache store

use crate::{CacheError, Partition, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Key-value storage split into named partitions.
///
/// Values are opaque encoded records; decoding and versioning belong to the
/// [`CacheStore`](crate::CacheStore).
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Read a record.
    ///
    /// A record the backend cannot unwrap fails with [`CacheError::Corrupt`].
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Bytes>>;

    /// Write or replace a record
    async fn put(&self, partition: Partition, key: &str, record: Bytes) -> Result<()>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, partition: Partition, key: &str) -> Result<bool>;

    /// Number of records in a partition
    async fn count(&self, partition: Partition) -> Result<usize>;

    /// Snapshot of the keys in a partition
    async fn keys(&self, partition: Partition) -> Result<Vec<String>>;

    /// Remove every record in a partition
    async fn clear(&self, partition: Partition) -> Result<()>;
}

/// Volatile backend for tests and hosts without persistence
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: [DashMap<String, Bytes>; 4],
}

impl MemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, partition: Partition) -> &DashMap<String, Bytes> {
        &self.records[partition.index()]
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Bytes>> {
        Ok(self.partition(partition).get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, partition: Partition, key: &str, record: Bytes) -> Result<()> {
        self.partition(partition).insert(key.to_string(), record);
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        Ok(self.partition(partition).remove(key).is_some())
    }

    async fn count(&self, partition: Partition) -> Result<usize> {
        Ok(self.partition(partition).len())
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        Ok(self
            .partition(partition)
            .iter()
            .map(|r| r.key().clone())
            .collect())
    }

    async fn clear(&self, partition: Partition) -> Result<()> {
        self.partition(partition).clear();
        Ok(())
    }
}

/// On-disk record layout
#[derive(Debug, Serialize, Deserialize)]
struct DiskRecord {
    key: String,
    value: Vec<u8>,
}

/// File-per-record backend that survives restarts.
///
/// Layout: `<root>/<partition>/<hash[..2]>/<hash>.bin` where `hash` is the
/// SHA-256 of the key. An in-memory index of keys is rebuilt on open.
pub struct DiskBackend {
    root: PathBuf,
    index: [DashMap<String, PathBuf>; 4],
}

impl DiskBackend {
    /// Open or create a backend rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for partition in Partition::ALL {
            fs::create_dir_all(root.join(partition.as_str()))
                .await
                .map_err(|e| {
                    CacheError::StoreUnavailable(format!("{}: {}", root.display(), e))
                })?;
        }

        let backend = Self {
            root,
            index: Default::default(),
        };
        backend.load_index().await?;

        Ok(backend)
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the key index from the files on disk
    async fn load_index(&self) -> Result<()> {
        let mut total = 0usize;

        for partition in Partition::ALL {
            let dir = self.root.join(partition.as_str());
            let mut shards = fs::read_dir(&dir).await?;

            while let Some(shard) = shards.next_entry().await? {
                if !shard.file_type().await?.is_dir() {
                    continue;
                }

                let mut files = fs::read_dir(shard.path()).await?;
                while let Some(file) = files.next_entry().await? {
                    let path = file.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                        continue;
                    }

                    match read_record(&path).await {
                        Ok(record) => {
                            self.index[partition.index()].insert(record.key, path);
                            total += 1;
                        }
                        Err(e) => {
                            warn!("Removing unreadable record {}: {}", path.display(), e);
                            let _ = fs::remove_file(&path).await;
                        }
                    }
                }
            }
        }

        info!("Loaded disk cache index: {} records", total);
        Ok(())
    }

    fn record_path(&self, partition: Partition, key: &str) -> PathBuf {
        let hash = hex::encode(Sha256::digest(key.as_bytes()));
        self.root
            .join(partition.as_str())
            .join(&hash[..2])
            .join(format!("{}.bin", hash))
    }
}

async fn read_record(path: &Path) -> Result<DiskRecord> {
    let data = fs::read(path).await?;
    Ok(bincode::deserialize(&data)?)
}

#[async_trait]
impl StoreBackend for DiskBackend {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<Bytes>> {
        let path = match self.index[partition.index()].get(key) {
            Some(path) => path.value().clone(),
            None => return Ok(None),
        };

        match read_record(&path).await {
            Ok(record) => Ok(Some(Bytes::from(record.value))),
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                self.index[partition.index()].remove(key);
                Ok(None)
            }
            Err(CacheError::Serialization(reason)) => Err(CacheError::Corrupt {
                key: key.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    async fn put(&self, partition: Partition, key: &str, record: Bytes) -> Result<()> {
        let path = self.record_path(partition, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let data = bincode::serialize(&DiskRecord {
            key: key.to_string(),
            value: record.to_vec(),
        })?;

        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, &data).await?;
        fs::rename(&tmp_path, &path).await?;

        self.index[partition.index()].insert(key.to_string(), path);
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<bool> {
        let Some((_, path)) = self.index[partition.index()].remove(key) else {
            return Ok(false);
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self, partition: Partition) -> Result<usize> {
        Ok(self.index[partition.index()].len())
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        Ok(self.index[partition.index()]
            .iter()
            .map(|r| r.key().clone())
            .collect())
    }

    async fn clear(&self, partition: Partition) -> Result<()> {
        let dir = self.root.join(partition.as_str());
        if dir.exists() {
            fs::remove_dir_all(&dir).await?;
        }
        fs::create_dir_all(&dir).await?;
        self.index[partition.index()].clear();

        debug!("Cleared disk partition {}", partition);
        Ok(())
    }
}
