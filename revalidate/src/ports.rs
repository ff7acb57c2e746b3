#![deny(clippy::all)]

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::Result;

// Ports are the pluggable seams between the cache and the outside world

/// Client-local key-value storage that outlives a single process.
///
/// Values are opaque bytes; the cache owns their encoding.
#[async_trait]
pub trait EntryStore: Send + Sync + 'static {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn write(&self, key: &str, value: Vec<u8>) -> Result<()>;
    /// Returns whether a value was present
    async fn remove(&self, key: &str) -> Result<bool>;
}

/// Remote source for a whole resource list (e.g. the catalog REST API).
///
/// Transport failures should map to `Error::Transient`, shape mismatches to
/// `Error::Decode`.
#[async_trait]
pub trait RemoteFetch<T>: Send + Sync + 'static {
    async fn fetch_all(&self) -> Result<Vec<T>>;
}

/// Bounds for items a cache slot can hold.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
