use async_trait::async_trait;
use moka::future::Cache;
use revalidate::ports::EntryStore;
use shared::{Error, Result};
use std::fmt::Debug;
use tracing::debug;

/// Moka-based in-memory entry store, bounded by total bytes
///
/// Entries never expire here: the cache decides freshness itself and must be
/// able to show an expired payload while it refreshes.
pub struct MokaEntryStore {
    entries: Cache<String, Vec<u8>>,
    max_bytes: u64,
}

impl MokaEntryStore {
    /// Same budget browsers give local storage
    pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;

    /// Create a store holding at most `max_bytes` of keys plus values
    pub fn new(name: &str, max_bytes: u64) -> Self {
        let entries = Cache::builder()
            .name(name)
            .max_capacity(max_bytes)
            .weigher(|key: &String, value: &Vec<u8>| -> u32 {
                u32::try_from(key.len() + value.len()).unwrap_or(u32::MAX)
            })
            .build();

        Self { entries, max_bytes }
    }

    pub fn with_defaults() -> Self {
        Self::new("entries", Self::DEFAULT_MAX_BYTES)
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EntryStore for MokaEntryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).await)
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let size = (key.len() + value.len()) as u64;
        if size > self.max_bytes {
            return Err(Error::Storage(format!(
                "quota exceeded: {} bytes for '{}', limit {}",
                size, key, self.max_bytes
            )));
        }

        debug!("Storing {} bytes under '{}'", size, key);
        self.entries.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).await.is_some())
    }
}

impl Debug for MokaEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaEntryStore")
            .field("entry_count", &self.entries.entry_count())
            .field("weighted_size", &self.entries.weighted_size())
            .field("max_bytes", &self.max_bytes)
            .finish()
    }
}
