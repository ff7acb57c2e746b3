// shared/src/lib.rs

use std::time::Duration;

/// Errors crossing crate boundaries.
///
/// Every variant carries owned strings only, so an error can be cloned and
/// handed to every task waiting on the same fetch.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("transient: {0}")]
    Transient(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Whether an explicit retry (load/refetch) could succeed without any
    /// change on the client side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TtlMs(pub u64);

impl TtlMs {
    /// Five minutes, the catalog refresh window.
    pub const DEFAULT: TtlMs = TtlMs(5 * 60 * 1000);

    pub fn from_secs(secs: u64) -> Self {
        TtlMs(secs.saturating_mul(1000))
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0)
    }
}

impl Default for TtlMs {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub mod config;
pub mod time;
