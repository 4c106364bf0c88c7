//! Coordination primitives
//!
//! Signals broadcast lifecycle events to any number of listeners; promises
//! carry a single completion notification.

pub mod promise;
pub mod signal;

pub use promise::Promise;
pub use signal::{Signal, SubscriptionId};
