//! REST access to the POS catalog and the caches built on top of it.

pub mod catalog;
pub mod client;
pub mod endpoints;
pub mod models;

pub use catalog::CatalogCaches;
pub use client::ApiClient;
pub use endpoints::{CatalogResource, ListEndpoint};
pub use models::{Category, Extra, Product, Subcategory};
