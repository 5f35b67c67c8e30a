//! Connectivity gate: decides per mutation whether to write directly or queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::Transport;
use crate::error::Result;
use crate::model::{AttendancePayload, MutationPayload, PaymentPayload, QueuedMutation};
use crate::store::LocalStore;

/// Runtime reachability signal, read synchronously at write time.
pub trait Connectivity: Send + Sync {
  fn is_online(&self) -> bool;
}

/// Shared online/offline flag toggled by the host.
#[derive(Debug, Clone)]
pub struct OnlineFlag(Arc<AtomicBool>);

impl OnlineFlag {
  pub fn new(online: bool) -> Self {
    Self(Arc::new(AtomicBool::new(online)))
  }

  pub fn set_online(&self, online: bool) {
    self.0.store(online, Ordering::SeqCst);
  }
}

impl Connectivity for OnlineFlag {
  fn is_online(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// Why a write went to the local queue instead of the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueReason {
  Offline,
  WriteFailed(String),
}

#[derive(Debug, Clone)]
pub enum WriteOutcome {
  /// The server accepted the direct write
  Sent(QueuedMutation),
  /// The mutation is pending in the local queue
  Queued {
    mutation: QueuedMutation,
    reason: QueueReason,
  },
}

impl WriteOutcome {
  pub fn mutation(&self) -> &QueuedMutation {
    match self {
      WriteOutcome::Sent(m) => m,
      WriteOutcome::Queued { mutation, .. } => mutation,
    }
  }

  pub fn is_queued(&self) -> bool {
    matches!(self, WriteOutcome::Queued { .. })
  }
}

/// Routes UI mutations to the network or the offline queue.
///
/// There are no synchronous retries: a failed direct write is queued and
/// retried by the next Sync-Up under the same idempotency key.
#[derive(Clone)]
pub struct Gate {
  store: Arc<LocalStore>,
  transport: Arc<dyn Transport>,
  connectivity: Arc<dyn Connectivity>,
}

impl Gate {
  pub fn new(
    store: Arc<LocalStore>,
    transport: Arc<dyn Transport>,
    connectivity: Arc<dyn Connectivity>,
  ) -> Self {
    Self {
      store,
      transport,
      connectivity,
    }
  }

  pub async fn submit_payment(&self, payload: PaymentPayload) -> Result<WriteOutcome> {
    self.submit(QueuedMutation::new(MutationPayload::Payment(payload))).await
  }

  pub async fn submit_attendance(&self, payload: AttendancePayload) -> Result<WriteOutcome> {
    self
      .submit(QueuedMutation::new(MutationPayload::Attendance(payload)))
      .await
  }

  /// Try a direct write, falling back to the queue on any failure.
  ///
  /// Only a local storage error is returned as `Err`.
  pub async fn submit(&self, mutation: QueuedMutation) -> Result<WriteOutcome> {
    let key = mutation.idempotency_key.clone();

    if !self.connectivity.is_online() {
      return self.queue(mutation, QueueReason::Offline);
    }

    match self.transport.submit(&mutation).await {
      Ok(()) => {
        info!(%key, kind = %mutation.kind(), "direct write accepted");
        Ok(WriteOutcome::Sent(mutation))
      }
      Err(e) => {
        // The server may have applied it anyway; the key makes the retry safe
        warn!(%key, error = %e, "direct write failed, queueing");
        self.queue(mutation, QueueReason::WriteFailed(e.to_string()))
      }
    }
  }

  fn queue(&self, mutation: QueuedMutation, reason: QueueReason) -> Result<WriteOutcome> {
    self.store.enqueue(&mutation)?;
    info!(key = %mutation.idempotency_key, ?reason, "mutation queued offline");
    Ok(WriteOutcome::Queued { mutation, reason })
  }
}
