//! Sync service that drains the offline queue and refreshes reference caches.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{Transport, UploadBatch, UploadResults};
use crate::error::Result;
use crate::gate::Connectivity;
use crate::model::MutationKind;
use crate::store::LocalStore;

/// Overall result of a sync call, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
  /// Nothing to do; no request was made
  Idle,
  Success,
  /// The server applied some items; the rest stay pending or were rejected
  Partial,
  /// Nothing changed locally (network failure, server error, offline)
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncUpReport {
  pub status: SyncStatus,
  pub detail: Option<String>,
  /// Items marked synced by this run
  pub synced: usize,
  /// Items the server explicitly rejected (now `failed`)
  pub rejected: usize,
  /// Items still pending after this run
  pub remaining: usize,
}

impl SyncUpReport {
  fn idle() -> Self {
    Self {
      status: SyncStatus::Idle,
      detail: None,
      synced: 0,
      rejected: 0,
      remaining: 0,
    }
  }

  fn error(detail: String, remaining: usize) -> Self {
    Self {
      status: SyncStatus::Error,
      detail: Some(detail),
      synced: 0,
      rejected: 0,
      remaining,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDownReport {
  pub status: SyncStatus,
  pub detail: Option<String>,
  pub students: usize,
  pub fees: usize,
}

impl SyncDownReport {
  fn error(detail: String) -> Self {
    Self {
      status: SyncStatus::Error,
      detail: Some(detail),
      students: 0,
      fees: 0,
    }
  }
}

/// Drives Sync-Up and Sync-Down against one store and one transport.
///
/// Network and server failures come back as `SyncStatus::Error` reports.
/// Only storage and authentication failures are returned as `Err`.
pub struct SyncService {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Arc<dyn Connectivity>,
  /// Serializes overlapping sync calls on this service
  in_flight: Mutex<()>,
}

impl SyncService {
  pub fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
      in_flight: Mutex::new(()),
    }
  }

  pub fn store(&self) -> &Arc<LocalStore> {
    &self.store
  }

  /// Upload every pending mutation and reconcile by idempotency key.
  ///
  /// 1. Read pending payments and attendance
  /// 2. If both are empty, return `Idle` without a request
  /// 3. Upload both kinds in one request
  /// 4. Mark acknowledged keys synced and rejected keys failed
  /// 5. Leave every other key pending for the next run
  #[instrument(skip(self))]
  pub async fn sync_up(&self) -> Result<SyncUpReport> {
    let _guard = self.in_flight.lock().await;

    let batch = UploadBatch {
      payments: self.store.list_pending(MutationKind::Payments)?,
      attendance: self.store.list_pending(MutationKind::Attendance)?,
    };

    if batch.is_empty() {
      debug!("nothing queued, skipping upload");
      return Ok(SyncUpReport::idle());
    }

    let submitted = batch.len();
    if !self.connectivity.is_online() {
      return Ok(SyncUpReport::error("offline".to_string(), submitted));
    }

    let results = match self.transport.upload(&batch).await {
      Ok(results) => results,
      Err(e) if e.is_recoverable() => {
        warn!(error = %e, pending = submitted, "upload failed, queue left intact");
        return Ok(SyncUpReport::error(e.to_string(), submitted));
      }
      Err(e) => return Err(e),
    };

    self.reconcile(&batch, &results)
  }

  fn reconcile(&self, batch: &UploadBatch, results: &UploadResults) -> Result<SyncUpReport> {
    let mut acknowledged: Vec<String> = Vec::new();
    let mut rejected: Vec<(String, Option<String>)> = Vec::new();

    for kind in MutationKind::ALL {
      let sent: HashSet<&str> = batch
        .items(kind)
        .iter()
        .map(|m| m.idempotency_key.as_str())
        .collect();
      let result = results.for_kind(kind);

      for key in &result.success {
        if acknowledged.contains(key) {
          continue;
        }
        if sent.contains(key.as_str()) {
          acknowledged.push(key.clone());
        } else {
          warn!(%key, %kind, "server acknowledged a key that was not uploaded");
        }
      }

      for item in &result.failed {
        let key = &item.idempotency_key;
        if rejected.iter().any(|(k, _)| k == key) {
          continue;
        }
        if !sent.contains(key.as_str()) {
          warn!(%key, %kind, "server rejected a key that was not uploaded");
        } else if result.success.contains(key) {
          warn!(%key, %kind, "key both acknowledged and rejected, keeping acknowledgement");
        } else {
          rejected.push((key.clone(), item.reason.clone()));
        }
      }
    }

    let synced = self.store.mark_synced_many(&acknowledged)?;
    let failed = self.store.mark_failed_many(&rejected)?;
    // Counted from rows that actually left `pending`
    let remaining = batch.len().saturating_sub(synced + failed);

    let (status, detail) = if remaining == 0 && failed == 0 {
      (SyncStatus::Success, None)
    } else {
      (
        SyncStatus::Partial,
        Some(format!("{} not applied by server, {} rejected", remaining, failed)),
      )
    };

    info!(synced, rejected = failed, remaining, ?status, "upload reconciled");

    Ok(SyncUpReport {
      status,
      detail,
      synced,
      rejected: failed,
      remaining,
    })
  }

  /// Replace the reference caches with the server's current snapshot.
  ///
  /// On any failure the caches are left exactly as they were.
  #[instrument(skip(self))]
  pub async fn sync_down(&self) -> Result<SyncDownReport> {
    let _guard = self.in_flight.lock().await;

    if !self.connectivity.is_online() {
      return Ok(SyncDownReport::error("offline".to_string()));
    }

    let snapshot = match self.transport.download().await {
      Ok(snapshot) => snapshot,
      Err(e) if e.is_recoverable() => {
        warn!(error = %e, "download failed, cache left untouched");
        return Ok(SyncDownReport::error(e.to_string()));
      }
      Err(e) => return Err(e),
    };

    self.store.upsert_reference(&snapshot)?;

    Ok(SyncDownReport {
      status: SyncStatus::Success,
      detail: None,
      students: snapshot.students.len(),
      fees: snapshot.fees.len(),
    })
  }

  /// Upload first, then refresh the caches.
  pub async fn sync_all(&self) -> Result<(SyncUpReport, SyncDownReport)> {
    let up = self.sync_up().await?;
    let down = self.sync_down().await?;
    Ok((up, down))
  }

  /// Run a sync cycle every `interval` until `shutdown` resolves.
  ///
  /// Cycles are skipped while offline. Storage and auth errors end the loop.
  pub async fn run_periodic<F>(&self, interval: Duration, shutdown: F) -> Result<()>
  where
    F: Future<Output = ()>,
  {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => {
          info!("periodic sync stopped");
          return Ok(());
        }
        _ = ticker.tick() => {
          if !self.connectivity.is_online() {
            debug!("offline, skipping sync cycle");
            continue;
          }

          match self.sync_all().await {
            Ok((up, down)) => {
              info!(up = ?up.status, down = ?down.status, "sync cycle finished");
            }
            Err(e) => {
              error!(error = %e, "sync cycle aborted");
              return Err(e);
            }
          }
        }
      }
    }
  }
}
