//! Offline-first sync core for the campus management client.
//!
//! Attendance and fee payments are written straight to the API when the
//! network is reachable and queued in a local SQLite store otherwise. A
//! user- or timer-triggered sync drains the queue and refreshes the cached
//! students and fees.

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod logging;
pub mod model;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use gate::{Connectivity, Gate, OnlineFlag, QueueReason, WriteOutcome};
pub use session::Session;
pub use store::{LocalStore, PendingCounts, StoreEvent};
pub use sync::{SyncDownReport, SyncService, SyncStatus, SyncUpReport};
