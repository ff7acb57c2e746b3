use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    ServedFromCache(ServedEvent),
    Refreshed(RefreshedEvent),
    RefreshFailed(RefreshFailedEvent),
    Invalidated(InvalidatedEvent),
    Cleared(ClearedEvent),
}

impl CacheEvent {
    pub fn cache_key(&self) -> &str {
        match self {
            CacheEvent::ServedFromCache(e) => &e.cache_key,
            CacheEvent::Refreshed(e) => &e.cache_key,
            CacheEvent::RefreshFailed(e) => &e.cache_key,
            CacheEvent::Invalidated(e) => &e.cache_key,
            CacheEvent::Cleared(e) => &e.cache_key,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            CacheEvent::ServedFromCache(e) => e.timestamp,
            CacheEvent::Refreshed(e) => e.timestamp,
            CacheEvent::RefreshFailed(e) => e.timestamp,
            CacheEvent::Invalidated(e) => e.timestamp,
            CacheEvent::Cleared(e) => e.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServedEvent {
    pub cache_key: String,
    pub item_count: usize,
    pub stored_at: u64,
    pub expired: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshedEvent {
    pub cache_key: String,
    pub item_count: usize,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshFailedEvent {
    pub cache_key: String,
    pub error: String,
    pub kept_items: usize,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidatedEvent {
    pub cache_key: String,
    pub existed: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearedEvent {
    pub cache_key: String,
    pub timestamp: u64,
}
