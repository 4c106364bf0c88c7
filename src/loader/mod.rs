//! Resource loading orchestration
//!
//! `ResourceLoader` groups resources into batches, schedules them under a
//! concurrency limit, relays per-resource events, and runs middleware
//! transforms when a batch completes.

mod events;
mod middleware;
mod resource_loader;

pub use events::BatchComplete;
pub use middleware::{DefaultMiddleware, ImageLoader, Middleware, ResourceEntry};
pub use resource_loader::{BatchHandle, DEFAULT_CONCURRENCY, LoaderConfig, ResourceLoader};
