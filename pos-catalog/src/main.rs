mod command;

use command::{Action, Invocation, USAGE};
use pos_api::{ApiClient, CatalogCaches, CatalogResource, Category, Extra, Product, Subcategory};
use revalidate::events::CacheEvent;
use revalidate::ports::{Cacheable, EntryStore};
use revalidate::{LoadState, SledEntryStore, StaleWhileRevalidate};
use shared::config::{Config, StorageMode};
use shared::time::format_utc;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use storage_engine::MokaEntryStore;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let invocation = match Invocation::parse(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    let config = Config::from_env();
    info!("API base URL: {}", config.api_url);

    // ============================================
    // STEP 1: Open entry storage
    // ============================================
    let store = open_store(&config);

    // ============================================
    // STEP 2: Build the catalog caches
    // ============================================
    let (events_tx, events_rx) = broadcast::channel(64);
    let event_logger = tokio::spawn(log_events(events_rx));

    let client = ApiClient::from_config(&config).with_token_store(Arc::clone(&store));
    let caches = CatalogCaches::new(&config, client, store, Some(events_tx));

    // ============================================
    // STEP 3: Run the requested action
    // ============================================
    let resources = match invocation.resource {
        Some(resource) => vec![resource],
        None => CatalogResource::ALL.to_vec(),
    };

    let mut ok = true;
    for resource in resources {
        ok &= match resource {
            CatalogResource::Products => {
                run(&caches.products, invocation.action, describe_product).await
            }
            CatalogResource::Categories => {
                run(&caches.categories, invocation.action, describe_category).await
            }
            CatalogResource::Subcategories => {
                run(&caches.subcategories, invocation.action, describe_subcategory).await
            }
            CatalogResource::Extras => run(&caches.extras, invocation.action, describe_extra).await,
        };
    }

    // Closing the last sender ends the event logger
    drop(caches);
    if tokio::time::timeout(Duration::from_millis(500), event_logger)
        .await
        .is_err()
    {
        debug!("Event logger still busy at exit");
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_store(config: &Config) -> Arc<dyn EntryStore> {
    match config.storage {
        StorageMode::Memory => {
            info!("Using in-memory entry storage");
            Arc::new(MokaEntryStore::with_defaults())
        }
        StorageMode::Persistent => {
            let path = config.cache_db_path();
            match SledEntryStore::open(&path) {
                Ok(store) => {
                    info!("Entry storage opened at {}", path.display());
                    Arc::new(store)
                }
                Err(e) => {
                    warn!("Failed to open entry storage: {}. Running in-memory mode.", e);
                    Arc::new(MokaEntryStore::with_defaults())
                }
            }
        }
    }
}

/// Run `action` on one slot. Returns `false` only when nothing could be shown.
async fn run<T: Cacheable>(
    cache: &StaleWhileRevalidate<T>,
    action: Action,
    describe: fn(&T) -> String,
) -> bool {
    let resource = cache.key().resource().to_string();

    let revalidation = match action {
        Action::Load => cache.load().await,
        Action::Refetch => cache.refetch().await,
        Action::Clear => {
            cache.clear().await;
            return true;
        }
        Action::Purge => {
            if !cache.purge_expired().await {
                info!("Nothing to purge for {}", resource);
            }
            return true;
        }
    };

    if let Some(entry) = revalidation.initial().entry() {
        info!(
            "Showing {} cached {} from {} ({}) while refreshing",
            entry.len(),
            resource,
            format_utc(entry.stored_at),
            revalidation.initial().status()
        );
    } else {
        info!("No cached {}, waiting for the API", resource);
    }

    let state = revalidation.finish().await;
    report(&resource, &state, describe);

    !(state.error().is_some() && state.items().is_empty())
}

fn report<T>(resource: &str, state: &LoadState<T>, describe: fn(&T) -> String) {
    match state.error() {
        Some(e) if state.items().is_empty() => {
            error!("Could not load {}: {}", resource, e);
            return;
        }
        Some(e) => warn!(
            "Refresh of {} failed ({}), showing {} previously loaded item(s)",
            resource,
            e,
            state.items().len()
        ),
        None => info!("{} {} item(s) ({})", resource, state.items().len(), state.status()),
    }

    for item in state.items() {
        println!("{}", describe(item));
    }
}

async fn log_events(mut events: broadcast::Receiver<CacheEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!("cache event: {}", json),
                Err(e) => warn!("Failed to serialize cache event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event logger lagged, skipped {} event(s)", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn describe_product(product: &Product) -> String {
    format!(
        "{:<32} {:>8.2}  stock {:>4}{}",
        product.name,
        product.price,
        product.stock,
        if product.available { "" } else { "  (unavailable)" }
    )
}

fn describe_category(category: &Category) -> String {
    format!(
        "{:<32} {} subcategories",
        category.name,
        category.subcategories.len()
    )
}

fn describe_subcategory(subcategory: &Subcategory) -> String {
    match &subcategory.category {
        Some(category) => format!("{:<32} in {}", subcategory.name, category.name),
        None => subcategory.name.clone(),
    }
}

fn describe_extra(extra: &Extra) -> String {
    format!("{:<32} {:>8.2}", extra.name, extra.price)
}
