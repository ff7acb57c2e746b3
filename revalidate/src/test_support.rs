//! In-crate fakes for the storage and fetch ports.

use crate::domain::{CacheEntry, CacheKey};
use crate::ports::{EntryStore, RemoteFetch};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    pub id: String,
    pub price: f64,
}

pub fn dish(id: &str, price: f64) -> Dish {
    Dish {
        id: id.to_string(),
        price,
    }
}

/// HashMap-backed store whose operations can be switched to fail.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.values.lock().insert(key.to_string(), value.to_vec());
    }

    pub fn seed(&self, key: &CacheKey, items: Vec<Dish>, stored_at: u64) {
        let bytes = CacheEntry::new(items, stored_at).encode(key).unwrap();
        self.values.lock().insert(key.storage_key(), bytes);
    }

    pub fn stored(&self, key: &CacheKey) -> Option<CacheEntry<Dish>> {
        self.raw(&key.storage_key())
            .map(|bytes| CacheEntry::decode(key, &bytes).unwrap())
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("read refused".into()));
        }
        Ok(self.raw(key))
    }

    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("quota exceeded".into()));
        }
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("remove refused".into()));
        }
        Ok(self.values.lock().remove(key).is_some())
    }
}

/// Fetcher answering from a queue of scripted responses.
///
/// When gated, each call waits for one [`ScriptedFetch::release`].
pub struct ScriptedFetch {
    responses: Mutex<VecDeque<Result<Vec<Dish>>>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl ScriptedFetch {
    pub fn new(responses: Vec<Result<Vec<Dish>>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(responses: Vec<Result<Vec<Dish>>>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(responses)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetch<Dish> for ScriptedFetch {
    async fn fetch_all(&self) -> Result<Vec<Dish>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
                .forget();
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Transient("no scripted response".into())))
    }
}
