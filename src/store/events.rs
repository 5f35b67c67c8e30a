//! Change notifications published by the local store.

use crate::model::MutationKind;

/// Published after a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
  /// A queued mutation of this kind was added or changed status
  QueueChanged { kind: MutationKind },
  /// The reference caches were refreshed from a snapshot
  ReferencesRefreshed { students: usize, fees: usize },
}

/// Queue sizes for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
  pub pending_payments: usize,
  pub pending_attendance: usize,
  pub failed_payments: usize,
  pub failed_attendance: usize,
}

impl PendingCounts {
  pub fn pending(&self, kind: MutationKind) -> usize {
    match kind {
      MutationKind::Payments => self.pending_payments,
      MutationKind::Attendance => self.pending_attendance,
    }
  }

  pub fn failed(&self, kind: MutationKind) -> usize {
    match kind {
      MutationKind::Payments => self.failed_payments,
      MutationKind::Attendance => self.failed_attendance,
    }
  }

  pub fn total_pending(&self) -> usize {
    self.pending_payments + self.pending_attendance
  }
}
