use crate::TtlMs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Where cache entries live between runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMode {
    /// Sled database under `data_dir`
    Persistent,
    /// Process-local store, gone on exit
    Memory,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persistent" | "sled" | "disk" => Ok(StorageMode::Persistent),
            "memory" | "mem" => Ok(StorageMode::Memory),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Normalised REST base URL, always ending in `/api`
    pub api_url: String,
    pub data_dir: String,
    pub cache_ttl: TtlMs,
    pub products_limit: u32,
    pub storage: StorageMode,
}

impl Config {
    const DEFAULT_API_URL: &'static str = "http://localhost:3000";
    const DEFAULT_DATA_DIR: &'static str = "./data";
    const DEFAULT_CACHE_TTL_SECS: u64 = 300;
    const DEFAULT_PRODUCTS_LIMIT: u32 = 100;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup("POS_API_URL").unwrap_or_else(|| Self::DEFAULT_API_URL.to_string());

        let cache_ttl_secs = parse_or(
            "POS_CACHE_TTL_SECS",
            lookup("POS_CACHE_TTL_SECS"),
            Self::DEFAULT_CACHE_TTL_SECS,
        );

        let storage = match lookup("POS_STORAGE") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to persistent storage", e);
                StorageMode::Persistent
            }),
            None => StorageMode::Persistent,
        };

        Self {
            api_url: normalize_api_url(&api_url),
            data_dir: lookup("POS_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            cache_ttl: TtlMs::from_secs(cache_ttl_secs),
            products_limit: parse_or(
                "POS_PRODUCTS_LIMIT",
                lookup("POS_PRODUCTS_LIMIT"),
                Self::DEFAULT_PRODUCTS_LIMIT,
            ),
            storage,
        }
    }

    /// Path of the sled database holding cache entries.
    pub fn cache_db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("cache.sled")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(name: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{}='{}' is not a valid value, using {}", name, raw, default);
            default
        }),
        None => default,
    }
}

/// Strip trailing slashes and make sure the URL ends in a single `/api`.
pub fn normalize_api_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.ends_with("/api") {
        trimmed.to_string()
    } else {
        format!("{}/api", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:3000/api");
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.cache_ttl, TtlMs::DEFAULT);
        assert_eq!(config.products_limit, 100);
        assert_eq!(config.storage, StorageMode::Persistent);
        assert_eq!(config.cache_db_path(), PathBuf::from("./data").join("cache.sled"));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("POS_API_URL", "https://pos.example.com/api/"),
            ("POS_DATA_DIR", "/var/lib/pos"),
            ("POS_CACHE_TTL_SECS", "60"),
            ("POS_PRODUCTS_LIMIT", "25"),
            ("POS_STORAGE", "Memory"),
        ]));
        assert_eq!(config.api_url, "https://pos.example.com/api");
        assert_eq!(config.data_dir, "/var/lib/pos");
        assert_eq!(config.cache_ttl, TtlMs(60_000));
        assert_eq!(config.products_limit, 25);
        assert_eq!(config.storage, StorageMode::Memory);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("POS_CACHE_TTL_SECS", "five minutes"),
            ("POS_PRODUCTS_LIMIT", "-3"),
            ("POS_STORAGE", "floppy"),
        ]));
        assert_eq!(config.cache_ttl, TtlMs::DEFAULT);
        assert_eq!(config.products_limit, 100);
        assert_eq!(config.storage, StorageMode::Persistent);
    }

    #[test]
    fn test_normalize_api_url() {
        assert_eq!(normalize_api_url("http://host"), "http://host/api");
        assert_eq!(normalize_api_url("http://host/"), "http://host/api");
        assert_eq!(normalize_api_url("http://host/api"), "http://host/api");
        assert_eq!(normalize_api_url("http://host/api//"), "http://host/api");
        assert_eq!(normalize_api_url(" http://host/v2 "), "http://host/v2/api");
    }
}
