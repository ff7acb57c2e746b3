use crate::ports::EntryStore;
use async_trait::async_trait;
use shared::{Error, Result};
use std::path::Path;

const ENTRIES_TREE: &str = "entries";

/// Sled-based persistence for cache entries
#[derive(Clone)]
pub struct SledEntryStore {
    db: sled::Db,
    entries: sled::Tree,
}

impl SledEntryStore {
    /// Open (or create) the store at `path`
    /// Creates the parent directory if it doesn't exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create directory: {}", e)))?;
        }

        let db = sled::open(path)
            .map_err(|e| Error::Storage(format!("Failed to open Sled database: {}", e)))?;

        Self::from_db(db)
    }

    /// Use an already opened database
    pub fn from_db(db: sled::Db) -> Result<Self> {
        let entries = db
            .open_tree(ENTRIES_TREE)
            .map_err(|e| Error::Storage(format!("Failed to open entries tree: {}", e)))?;

        Ok(Self { db, entries })
    }

    fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| Error::Storage(format!("Failed to flush database: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl EntryStore for SledEntryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = self
            .entries
            .get(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to read entry: {}", e)))?;

        Ok(value.map(|bytes| bytes.to_vec()))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries
            .insert(key.as_bytes(), value)
            .map_err(|e| Error::Storage(format!("Failed to write entry: {}", e)))?;

        self.flush()
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .entries
            .remove(key.as_bytes())
            .map_err(|e| Error::Storage(format!("Failed to remove entry: {}", e)))?
            .is_some();

        self.flush()?;

        Ok(removed)
    }
}

impl std::fmt::Debug for SledEntryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledEntryStore")
            .field("entries", &self.entries.len())
            .finish()
    }
}
