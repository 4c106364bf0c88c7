//! resload - bounded-concurrency resource loading with grouped completion
//!
//! The `scheduler` runs tasks from many groups under one concurrency limit
//! and reports each group's results in submission order. The `loader`
//! builds on it to fetch batches of resources, relaying their events and
//! running middleware over finished batches.

pub mod coordination;
pub mod error;
pub mod loader;
pub mod resource;
pub mod scheduler;

pub use error::{LoadError, LoaderError, Result};
pub use loader::{BatchComplete, BatchHandle, LoaderConfig, Middleware, ResourceEntry, ResourceLoader};
pub use resource::{HttpConfig, Resource};
