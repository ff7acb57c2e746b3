use crate::client::ApiClient;
use crate::endpoints::{CatalogResource, ListEndpoint};
use crate::models::{Category, Extra, Product, Subcategory};
use revalidate::events::CacheEvent;
use revalidate::ports::{Cacheable, EntryStore};
use revalidate::swr::StaleWhileRevalidate;
use shared::config::Config;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// The catalog caches of one running front-end, built once at startup and
/// handed to every view that needs them.
#[derive(Clone, Debug)]
pub struct CatalogCaches {
    pub products: StaleWhileRevalidate<Product>,
    pub categories: StaleWhileRevalidate<Category>,
    pub subcategories: StaleWhileRevalidate<Subcategory>,
    pub extras: StaleWhileRevalidate<Extra>,
}

impl CatalogCaches {
    pub fn new(
        config: &Config,
        client: ApiClient,
        store: Arc<dyn EntryStore>,
        events: Option<broadcast::Sender<CacheEvent>>,
    ) -> Self {
        let slots = SlotFactory {
            config,
            client,
            store,
            events,
        };

        Self {
            products: slots.build(CatalogResource::Products),
            categories: slots.build(CatalogResource::Categories),
            subcategories: slots.build(CatalogResource::Subcategories),
            extras: slots.build(CatalogResource::Extras),
        }
    }

    /// Show stored payloads in every slot without fetching.
    pub async fn init(&self) {
        let products = self.products.init().await;
        let categories = self.categories.init().await;
        let subcategories = self.subcategories.init().await;
        let extras = self.extras.init().await;
        info!(
            "Catalog primed from storage: {} products, {} categories, {} subcategories, {} extras",
            products.items().len(),
            categories.items().len(),
            subcategories.items().len(),
            extras.items().len()
        );
    }

    /// Drop every stored slot and reset subscribers.
    pub async fn clear(&self) {
        self.products.clear().await;
        self.categories.clear().await;
        self.subcategories.clear().await;
        self.extras.clear().await;
    }

    /// Purge expired or unreadable slots; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        [
            self.products.purge_expired().await,
            self.categories.purge_expired().await,
            self.subcategories.purge_expired().await,
            self.extras.purge_expired().await,
        ]
        .into_iter()
        .filter(|removed| *removed)
        .count()
    }
}

struct SlotFactory<'a> {
    config: &'a Config,
    client: ApiClient,
    store: Arc<dyn EntryStore>,
    events: Option<broadcast::Sender<CacheEvent>>,
}

impl SlotFactory<'_> {
    fn build<T: Cacheable>(&self, resource: CatalogResource) -> StaleWhileRevalidate<T> {
        let fetcher = Arc::new(ListEndpoint::<T>::for_resource(
            self.client.clone(),
            resource,
            self.config.products_limit,
        ));

        match &self.events {
            Some(events) => StaleWhileRevalidate::with_event_broadcaster(
                resource.cache_key(),
                self.config.cache_ttl,
                Arc::clone(&self.store),
                fetcher,
                events.clone(),
            ),
            None => StaleWhileRevalidate::new(
                resource.cache_key(),
                self.config.cache_ttl,
                Arc::clone(&self.store),
                fetcher,
            ),
        }
    }
}
