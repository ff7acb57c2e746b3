pub mod cache;
mod inflight;

pub use cache::{Revalidation, StaleWhileRevalidate};
pub use inflight::SharedFetch;
