use crate::models::{Category, Extra, ListBody, Product, Subcategory};
use reqwest::{Client, StatusCode};
use revalidate::ports::EntryStore;
use serde::de::DeserializeOwned;
use shared::config::{Config, normalize_api_url};
use shared::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage key holding the bearer token issued at login
pub const TOKEN_KEY: &str = "token";

/// REST client for the POS backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token_store: Option<Arc<dyn EntryStore>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: normalize_api_url(base_url),
            token_store: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_url)
    }

    /// Attach `Authorization: Bearer <token>` from `store` on every request,
    /// and drop the token there when the server answers 401.
    pub fn with_token_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn bearer_token(&self) -> Option<String> {
        let store = self.token_store.as_ref()?;
        match store.read(TOKEN_KEY).await {
            Ok(Some(bytes)) => {
                let token = String::from_utf8_lossy(&bytes).trim().to_string();
                (!token.is_empty()).then_some(token)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read auth token: {}", e);
                None
            }
        }
    }

    async fn forget_token(&self) {
        if let Some(store) = &self.token_store {
            if let Err(e) = store.remove(TOKEN_KEY).await {
                warn!("Failed to drop rejected auth token: {}", e);
            }
        }
    }

    /// GET `path` (relative to the API base) and decode the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let url = self.url(path);
        debug!("Making request to: {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = self.bearer_token().await {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Request to {} failed: {}", url, e);
            transport_error(e)
        })?;

        match response.status() {
            status if status.is_success() => response.json().await.map_err(transport_error),
            StatusCode::UNAUTHORIZED => {
                // The caller decides where to send the user next
                self.forget_token().await;
                Err(Error::Unauthorized)
            }
            StatusCode::NOT_FOUND => Err(Error::NotFound),
            status if status.is_server_error() => {
                Err(Error::Transient(format!("{} returned {}", url, status)))
            }
            status => Err(Error::Internal(format!("{} rejected request: {}", url, status))),
        }
    }

    /// GET a list endpoint, accepting wrapped and bare bodies.
    pub async fn get_list<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let body: ListBody<T> = self.get_json(path).await?;
        Ok(body.into_items())
    }

    pub async fn get_products(&self, limit: u32) -> Result<Vec<Product>> {
        self.get_list(&format!("/products?limit={}", limit)).await
    }

    pub async fn get_product(&self, id: &str) -> Result<Product> {
        self.get_json(&format!("/products/{}", id)).await
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        self.get_list("/categories").await
    }

    pub async fn get_subcategories(&self) -> Result<Vec<Subcategory>> {
        self.get_list("/subcategories").await
    }

    pub async fn get_extras(&self) -> Result<Vec<Extra>> {
        self.get_list("/extras").await
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_decode() {
        Error::Decode(e.to_string())
    } else {
        Error::Transient(e.to_string())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("token_store", &self.token_store.is_some())
            .finish()
    }
}
