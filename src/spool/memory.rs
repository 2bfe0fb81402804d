//! In-memory spool, used as a fallback when disk initialization fails.

use super::{SpoolEntryInfo, SpoolKind, StorageAdapter};
use crate::error::SpoolError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

struct Entry {
    bytes: Bytes,
    kind: SpoolKind,
}

struct State {
    entries: HashMap<String, Entry>,
    order: VecDeque<String>,
    total_size: u64,
}

/// Trivially durable spool (everything lives in the process' heap).
pub struct MemorySpool {
    state: Mutex<State>,
}

impl MemorySpool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                order: VecDeque::new(),
                total_size: 0,
            }),
        }
    }
}

impl Default for MemorySpool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for MemorySpool {
    async fn write(&self, id: &str, bytes: Bytes, kind: SpoolKind) -> Result<(), SpoolError> {
        let mut state = self.state.lock();
        if let Some(old) = state.entries.remove(id) {
            state.total_size = state.total_size.saturating_sub(old.bytes.len() as u64);
            state.order.retain(|existing| existing != id);
        }
        state.total_size += bytes.len() as u64;
        state.order.push_back(id.to_string());
        state.entries.insert(id.to_string(), Entry { bytes, kind });
        Ok(())
    }

    async fn read(&self, id: &str) -> Result<Option<Bytes>, SpoolError> {
        Ok(self.state.lock().entries.get(id).map(|e| e.bytes.clone()))
    }

    async fn delete(&self, id: &str) -> Result<(), SpoolError> {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.remove(id) {
            state.total_size = state.total_size.saturating_sub(entry.bytes.len() as u64);
            state.order.retain(|existing| existing != id);
        }
        Ok(())
    }

    async fn list(&self) -> Vec<SpoolEntryInfo> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|(id, entry)| SpoolEntryInfo {
                id: id.clone(),
                kind: entry.kind,
                size: entry.bytes.len() as u64,
            })
            .collect()
    }

    async fn size(&self) -> u64 {
        self.state.lock().total_size
    }

    async fn evict_to_fit(&self, quota: u64) {
        loop {
            let victim = {
                let state = self.state.lock();
                if state.total_size <= quota {
                    return;
                }
                state.order.front().cloned()
            };
            let Some(id) = victim else {
                return;
            };
            let _ = self.delete(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_fifo_under_quota() {
        let spool = MemorySpool::new();
        for i in 0..3 {
            spool
                .write(&format!("id{i}"), Bytes::from(vec![0u8; 400]), SpoolKind::Data)
                .await
                .unwrap();
            spool.evict_to_fit(1000).await;
        }
        assert!(spool.size().await <= 1000);
        assert_eq!(spool.read("id0").await.unwrap(), None);
    }
}
