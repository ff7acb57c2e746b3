use crate::client::ApiClient;
use async_trait::async_trait;
use revalidate::domain::CacheKey;
use revalidate::ports::{Cacheable, RemoteFetch};
use shared::Result;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// Catalog resource classes that get their own cache slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CatalogResource {
    Products,
    Categories,
    Subcategories,
    Extras,
}

impl CatalogResource {
    pub const ALL: [CatalogResource; 4] = [
        CatalogResource::Products,
        CatalogResource::Categories,
        CatalogResource::Subcategories,
        CatalogResource::Extras,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CatalogResource::Products => "products",
            CatalogResource::Categories => "categories",
            CatalogResource::Subcategories => "subcategories",
            CatalogResource::Extras => "extras",
        }
    }

    /// Slot key: `products_cache` holding `{ "products": [...], "timestamp": ... }`.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.name())
    }

    /// List path relative to the API base.
    pub fn path(&self, products_limit: u32) -> String {
        match self {
            CatalogResource::Products => format!("/products?limit={}", products_limit),
            other => format!("/{}", other.name()),
        }
    }
}

impl fmt::Display for CatalogResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CatalogResource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CatalogResource::ALL
            .into_iter()
            .find(|resource| resource.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown catalog resource '{}'", s))
    }
}

/// A list endpoint used as the remote source of a cache slot.
pub struct ListEndpoint<T> {
    client: ApiClient,
    path: String,
    _item: PhantomData<fn() -> T>,
}

impl<T> ListEndpoint<T> {
    pub fn new(client: ApiClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            _item: PhantomData,
        }
    }

    pub fn for_resource(client: ApiClient, resource: CatalogResource, products_limit: u32) -> Self {
        Self::new(client, resource.path(products_limit))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl<T> RemoteFetch<T> for ListEndpoint<T>
where
    T: Cacheable,
{
    async fn fetch_all(&self) -> Result<Vec<T>> {
        self.client.get_list(&self.path).await
    }
}
