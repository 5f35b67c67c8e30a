//! Durable local store for offline queues and reference caches.
//!
//! This module owns the SQLite database that:
//! - Holds queued payment and attendance mutations until the server confirms them
//! - Mirrors students and fees from the last successful snapshot pull
//! - Publishes change events so front ends can show live queue counts
//!
//! It never touches the network.

mod events;
mod local;
mod schema;

pub use events::{PendingCounts, StoreEvent};
pub use local::LocalStore;
