use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared::{Error, Result, TtlMs};
use std::fmt;
use std::sync::Arc;

const TIMESTAMP_FIELD: &str = "timestamp";
const KEY_SUFFIX: &str = "_cache";

/// Identifies one cache slot: a single entry per resource class, never per query.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: String,
    payload_field: String,
}

impl CacheKey {
    /// Key for `resource`, storing the payload under a field of the same name.
    pub fn new(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self {
            payload_field: resource.clone(),
            resource,
        }
    }

    pub fn with_payload_field(mut self, field: impl Into<String>) -> Self {
        self.payload_field = field.into();
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn payload_field(&self) -> &str {
        &self.payload_field
    }

    /// Key under which the entry is persisted, e.g. `products_cache`.
    pub fn storage_key(&self) -> String {
        format!("{}{}", self.resource, KEY_SUFFIX)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource, KEY_SUFFIX)
    }
}

/// Whether a shown payload is still inside its TTL window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Valid,
    Expired,
}

/// A payload together with the wall-clock time it was fetched.
///
/// The payload is shared behind an `Arc` and is never mutated after
/// construction; a newer fetch produces a new entry.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub payload: Arc<Vec<T>>,
    /// Epoch milliseconds
    pub stored_at: u64,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            stored_at: self.stored_at,
        }
    }
}

impl<T: PartialEq> PartialEq for CacheEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.stored_at == other.stored_at && self.payload == other.payload
    }
}

impl<T> CacheEntry<T> {
    pub fn new(payload: Vec<T>, stored_at: u64) -> Self {
        Self {
            payload: Arc::new(payload),
            stored_at,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Age at `now`. Entries stamped in the future count as brand new.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.stored_at)
    }

    pub fn is_valid(&self, now: u64, ttl: TtlMs) -> bool {
        self.age_ms(now) < ttl.0
    }

    pub fn freshness(&self, now: u64, ttl: TtlMs) -> Freshness {
        if self.is_valid(now, ttl) {
            Freshness::Valid
        } else {
            Freshness::Expired
        }
    }
}

impl<T: Serialize> CacheEntry<T> {
    /// Encode as `{ "<payloadField>": [...], "timestamp": <epoch-millis> }`.
    pub fn encode(&self, key: &CacheKey) -> Result<Vec<u8>> {
        let payload = serde_json::to_value(&*self.payload)
            .map_err(|e| Error::Internal(format!("Failed to serialize payload: {}", e)))?;

        let mut blob = Map::with_capacity(2);
        blob.insert(key.payload_field().to_string(), payload);
        blob.insert(TIMESTAMP_FIELD.to_string(), Value::from(self.stored_at));

        serde_json::to_vec(&Value::Object(blob))
            .map_err(|e| Error::Internal(format!("Failed to serialize entry: {}", e)))
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    /// Decode a stored blob. Any shape mismatch is a [`Error::Decode`].
    pub fn decode(key: &CacheKey, bytes: &[u8]) -> Result<Self> {
        let blob: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::Decode(format!("entry is not valid JSON: {}", e)))?;

        let Value::Object(mut fields) = blob else {
            return Err(Error::Decode("entry is not a JSON object".to_string()));
        };

        let stored_at = fields
            .get(TIMESTAMP_FIELD)
            .and_then(timestamp_millis)
            .ok_or_else(|| Error::Decode(format!("missing or invalid '{}'", TIMESTAMP_FIELD)))?;

        let payload = fields
            .remove(key.payload_field())
            .ok_or_else(|| Error::Decode(format!("missing '{}'", key.payload_field())))?;

        let payload: Vec<T> = serde_json::from_value(payload)
            .map_err(|e| Error::Decode(format!("invalid '{}': {}", key.payload_field(), e)))?;

        Ok(Self::new(payload, stored_at))
    }
}

// Browsers write `Date.now()`, which can round-trip through JSON as a float.
fn timestamp_millis(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|ms| ms.is_finite() && *ms >= 0.0 && *ms <= u64::MAX as f64)
            .map(|ms| ms as u64)
    })
}

/// What a consumer should render for one cache slot.
#[derive(Debug)]
pub enum LoadState<T> {
    /// Nothing loaded yet
    Idle,
    /// No cached payload; a fetch is running
    Loading,
    /// Payload served from storage while a refresh runs
    Stale {
        entry: CacheEntry<T>,
        freshness: Freshness,
    },
    /// Payload confirmed by the remote source
    Fresh(CacheEntry<T>),
    /// The last refresh failed; the previously shown payload, if any, is kept
    Error {
        error: Error,
        last_known: Option<CacheEntry<T>>,
    },
}

impl<T> Clone for LoadState<T> {
    fn clone(&self) -> Self {
        match self {
            LoadState::Idle => LoadState::Idle,
            LoadState::Loading => LoadState::Loading,
            LoadState::Stale { entry, freshness } => LoadState::Stale {
                entry: entry.clone(),
                freshness: *freshness,
            },
            LoadState::Fresh(entry) => LoadState::Fresh(entry.clone()),
            LoadState::Error { error, last_known } => LoadState::Error {
                error: error.clone(),
                last_known: last_known.clone(),
            },
        }
    }
}

impl<T: PartialEq> PartialEq for LoadState<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LoadState::Idle, LoadState::Idle) | (LoadState::Loading, LoadState::Loading) => true,
            (
                LoadState::Stale { entry: a, freshness: fa },
                LoadState::Stale { entry: b, freshness: fb },
            ) => a == b && fa == fb,
            (LoadState::Fresh(a), LoadState::Fresh(b)) => a == b,
            (
                LoadState::Error { error: ea, last_known: la },
                LoadState::Error { error: eb, last_known: lb },
            ) => ea == eb && la == lb,
            _ => false,
        }
    }
}

impl<T> LoadState<T> {
    /// The payload currently worth rendering, if any.
    pub fn entry(&self) -> Option<&CacheEntry<T>> {
        match self {
            LoadState::Stale { entry, .. } | LoadState::Fresh(entry) => Some(entry),
            LoadState::Error { last_known, .. } => last_known.as_ref(),
            LoadState::Idle | LoadState::Loading => None,
        }
    }

    /// Items to render; empty when nothing is available.
    pub fn items(&self) -> &[T] {
        self.entry().map(CacheEntry::items).unwrap_or(&[])
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, LoadState::Fresh(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, LoadState::Stale { .. })
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            LoadState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Short label for logs.
    pub fn status(&self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::Loading => "loading",
            LoadState::Stale {
                freshness: Freshness::Valid,
                ..
            } => "stale",
            LoadState::Stale {
                freshness: Freshness::Expired,
                ..
            } => "stale-expired",
            LoadState::Fresh(_) => "fresh",
            LoadState::Error { .. } => "error",
        }
    }
}
