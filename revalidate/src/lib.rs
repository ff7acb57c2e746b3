//! Stale-while-revalidate loading for slowly changing reference data.
//!
//! A [`StaleWhileRevalidate`] cache serves the last stored payload for a
//! resource class straight away, refreshes it from a [`RemoteFetch`] source,
//! and persists the result through an [`EntryStore`].

pub mod domain;
pub mod events;
pub mod persistence;
pub mod ports;
pub mod swr;

#[cfg(test)]
mod test_support;

pub use domain::{CacheEntry, CacheKey, Freshness, LoadState};
pub use events::CacheEvent;
pub use persistence::SledEntryStore;
pub use ports::{Cacheable, EntryStore, RemoteFetch};
pub use swr::{Revalidation, StaleWhileRevalidate};
