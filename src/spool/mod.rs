//! The durable, bounded local spool.
//!
//! Two backends share one contract: [`StorageAdapter`]. `DiskSpool` is the
//! default; `MemorySpool` is the fallback swapped in when disk
//! initialization fails.

mod disk;
mod memory;

pub use disk::DiskSpool;
pub use memory::MemorySpool;

use crate::error::SpoolError;
use async_trait::async_trait;
use bytes::Bytes;

/// The two logical streams the spool persists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpoolKind {
    Data,
    Events,
}

impl SpoolKind {
    fn extension(self) -> &'static str {
        match self {
            SpoolKind::Data => "data.bin",
            SpoolKind::Events => "events.json",
        }
    }
}

/// Metadata about one entry, independent of backend.
#[derive(Clone, Debug)]
pub struct SpoolEntryInfo {
    pub id: String,
    pub kind: SpoolKind,
    pub size: u64,
}

/// Bounded, FIFO-evicting persistence for event-batches and data-blobs.
///
/// Writes are durable-on-return: the payload is fully flushed before the
/// call resolves for the disk backend, and trivially durable for the
/// in-memory one. `evict_to_fit` removes oldest entries (by insertion
/// order) until total size is within `quota`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn write(&self, id: &str, bytes: Bytes, kind: SpoolKind) -> Result<(), SpoolError>;
    async fn read(&self, id: &str) -> Result<Option<Bytes>, SpoolError>;
    async fn delete(&self, id: &str) -> Result<(), SpoolError>;
    async fn list(&self) -> Vec<SpoolEntryInfo>;
    async fn size(&self) -> u64;
    async fn evict_to_fit(&self, quota: u64);
}
