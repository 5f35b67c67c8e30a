//! Network side of the sync core: the transport seam and its HTTP implementation.

mod client;
mod types;

pub use client::HttpTransport;
pub use types::{KindResult, RejectedItem, UploadBatch, UploadResponse, UploadResults};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{QueuedMutation, ReferenceSnapshot};

/// Calls the sync core makes against the campus API.
///
/// Errors are classified: `Error::Network` when the request never completed,
/// `Error::Server` for non-success responses, `Error::Auth` for a missing or
/// rejected credential.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Upload queued mutations in one request and return the per-kind results.
  async fn upload(&self, batch: &UploadBatch) -> Result<UploadResults>;

  /// Fetch the full reference snapshot.
  async fn download(&self) -> Result<ReferenceSnapshot>;

  /// Write a single mutation directly while online.
  async fn submit(&self, mutation: &QueuedMutation) -> Result<()>;
}
