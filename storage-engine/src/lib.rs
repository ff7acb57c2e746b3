//! Storage backends for cache entries that don't need a database.

pub mod moka_store;

pub use moka_store::MokaEntryStore;
