//! Filesystem-backed spool.
//!
//! Layout: `{root}/data/{id}.data.bin` and `{root}/events/{id}.events.json`.
//! The filename alone determines kind; there is no sidecar index. An
//! in-memory registry tracks `{id → (path, size, createdAt)}` plus an
//! insertion-ordered sequence used for FIFO eviction.

use super::{SpoolEntryInfo, SpoolKind, StorageAdapter};
use crate::error::SpoolError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;

struct Registry {
    /// id -> (path, size, kind)
    entries: std::collections::HashMap<String, (PathBuf, u64, SpoolKind)>,
    /// insertion order, oldest first, for FIFO eviction
    order: VecDeque<String>,
    total_size: u64,
}

impl Registry {
    fn new() -> Self {
        Self {
            entries: std::collections::HashMap::new(),
            order: VecDeque::new(),
            total_size: 0,
        }
    }

    fn insert(&mut self, id: String, path: PathBuf, size: u64, kind: SpoolKind) {
        if let Some((_, old_size, _)) = self.entries.remove(&id) {
            self.total_size = self.total_size.saturating_sub(old_size);
            self.order.retain(|existing| existing != &id);
        }
        self.total_size += size;
        self.order.push_back(id.clone());
        self.entries.insert(id, (path, size, kind));
    }

    fn remove(&mut self, id: &str) -> Option<(PathBuf, u64, SpoolKind)> {
        if let Some((path, size, kind)) = self.entries.remove(id) {
            self.total_size = self.total_size.saturating_sub(size);
            self.order.retain(|existing| existing != id);
            Some((path, size, kind))
        } else {
            None
        }
    }

    fn oldest(&self) -> Option<String> {
        self.order.front().cloned()
    }
}

/// Durable spool backed by the filesystem.
pub struct DiskSpool {
    root: PathBuf,
    registry: Mutex<Registry>,
}

impl DiskSpool {
    fn data_dir(root: &Path) -> PathBuf {
        root.join("data")
    }

    fn events_dir(root: &Path) -> PathBuf {
        root.join("events")
    }

    fn path_for(root: &Path, id: &str, kind: SpoolKind) -> PathBuf {
        let dir = match kind {
            SpoolKind::Data => Self::data_dir(root),
            SpoolKind::Events => Self::events_dir(root),
        };
        dir.join(format!("{id}.{}", kind.extension()))
    }

    /// Parse a filename back into `(id, kind)` per the naming convention,
    /// or `None` if it doesn't match (recovery tolerates stray files).
    fn parse_filename(name: &str) -> Option<(String, SpoolKind)> {
        if let Some(id) = name.strip_suffix(".data.bin") {
            Some((id.to_string(), SpoolKind::Data))
        } else {
            name.strip_suffix(".events.json")
                .map(|id| (id.to_string(), SpoolKind::Events))
        }
    }

    /// Create and scan the spool root. A recovery scan must succeed
    /// against a partially written directory (tolerate missing subdirs).
    #[tracing::instrument(name = "disk_spool.init", skip(root))]
    pub async fn init(root: PathBuf) -> Result<Self, SpoolError> {
        fs::create_dir_all(Self::data_dir(&root))
            .await
            .map_err(|source| SpoolError::Io {
                id: "data/".into(),
                source,
            })?;
        fs::create_dir_all(Self::events_dir(&root))
            .await
            .map_err(|source| SpoolError::Io {
                id: "events/".into(),
                source,
            })?;

        let mut found = Vec::new();
        for dir in [Self::data_dir(&root), Self::events_dir(&root)] {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = read_dir.next_entry().await {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let Some((id, kind)) = Self::parse_filename(name) else {
                    continue;
                };
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                let created_at = meta.created().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((id, kind, entry.path(), meta.len(), created_at));
            }
        }
        found.sort_by_key(|(_, _, _, _, created_at)| *created_at);

        let mut registry = Registry::new();
        for (id, kind, path, size, _) in found {
            registry.insert(id, path, size, kind);
        }

        tracing::debug!(recovered = registry.entries.len(), root = ?root, "disk spool scan complete");

        Ok(Self {
            root,
            registry: Mutex::new(registry),
        })
    }
}

#[async_trait]
impl StorageAdapter for DiskSpool {
    #[tracing::instrument(name = "disk_spool.write", skip(self, bytes))]
    async fn write(&self, id: &str, bytes: Bytes, kind: SpoolKind) -> Result<(), SpoolError> {
        let path = Self::path_for(&self.root, id, kind);
        let size = bytes.len() as u64;

        let mut file = fs::File::create(&path)
            .await
            .map_err(|source| SpoolError::Io { id: id.to_string(), source })?;
        file.write_all(&bytes)
            .await
            .map_err(|source| SpoolError::Io { id: id.to_string(), source })?;
        file.flush()
            .await
            .map_err(|source| SpoolError::Io { id: id.to_string(), source })?;

        self.registry.lock().insert(id.to_string(), path, size, kind);
        tracing::trace!(id, size, "spool entry written");
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Bytes>, SpoolError> {
        let path = { self.registry.lock().entries.get(id).map(|(p, ..)| p.clone()) };
        let Some(path) = path else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SpoolError::Io { id: id.to_string(), source }),
        }
    }

    #[tracing::instrument(name = "disk_spool.delete", skip(self))]
    async fn delete(&self, id: &str) -> Result<(), SpoolError> {
        let removed = self.registry.lock().remove(id);
        if let Some((path, ..)) = removed {
            if let Err(source) = fs::remove_file(&path).await {
                // I/O errors during delete are swallowed; the registry
                // entry is already gone.
                tracing::warn!(id, error = %source, "failed to remove spool file from disk");
            }
        }
        Ok(())
    }

    async fn list(&self) -> Vec<SpoolEntryInfo> {
        let registry = self.registry.lock();
        registry
            .entries
            .iter()
            .map(|(id, (_, size, kind))| SpoolEntryInfo {
                id: id.clone(),
                kind: *kind,
                size: *size,
            })
            .collect()
    }

    async fn size(&self) -> u64 {
        self.registry.lock().total_size
    }

    #[tracing::instrument(name = "disk_spool.evict_to_fit", skip(self))]
    async fn evict_to_fit(&self, quota: u64) {
        loop {
            let victim = {
                let registry = self.registry.lock();
                if registry.total_size <= quota {
                    return;
                }
                registry.oldest()
            };
            let Some(id) = victim else {
                return;
            };
            tracing::debug!(id, "evicting oldest spool entry to satisfy quota");
            let _ = self.delete(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spool = DiskSpool::init(dir.path().to_path_buf()).await.unwrap();

        spool
            .write("abc", Bytes::from_static(b"hello"), SpoolKind::Data)
            .await
            .unwrap();
        assert_eq!(spool.read("abc").await.unwrap().unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(spool.size().await, 5);

        spool.delete("abc").await.unwrap();
        assert_eq!(spool.read("abc").await.unwrap(), None);
        assert_eq!(spool.size().await, 0);
    }

    #[tokio::test]
    async fn evicts_oldest_entries_first_to_satisfy_quota() {
        let dir = tempfile::tempdir().unwrap();
        let spool = DiskSpool::init(dir.path().to_path_buf()).await.unwrap();

        for i in 0..3 {
            spool
                .write(&format!("id{i}"), Bytes::from(vec![0u8; 500]), SpoolKind::Data)
                .await
                .unwrap();
            spool.evict_to_fit(1024).await;
        }

        assert!(spool.size().await <= 1024);
        assert_eq!(spool.read("id0").await.unwrap(), None);
        assert!(spool.read("id2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recovers_entries_on_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let spool = DiskSpool::init(dir.path().to_path_buf()).await.unwrap();
            spool
                .write("blob1", Bytes::from_static(b"payload"), SpoolKind::Data)
                .await
                .unwrap();
        }

        let spool = DiskSpool::init(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(spool.size().await, 7);
        let entries = spool.list().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, SpoolKind::Data);
    }

    #[tokio::test]
    async fn tolerates_partially_written_directory() {
        let dir = tempfile::tempdir().unwrap();
        // Only create the data/ subdir, not events/ — init must still succeed.
        fs::create_dir_all(dir.path().join("data")).await.unwrap();
        let spool = DiskSpool::init(dir.path().to_path_buf()).await;
        assert!(spool.is_ok());
    }
}
