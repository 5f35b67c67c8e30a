//! Request and response bodies for the sync endpoints.

use serde::{Deserialize, Serialize};

use crate::model::{MutationKind, QueuedMutation};

/// Body of the upload request, grouped by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadBatch {
  pub payments: Vec<QueuedMutation>,
  pub attendance: Vec<QueuedMutation>,
}

impl UploadBatch {
  pub fn items(&self, kind: MutationKind) -> &[QueuedMutation] {
    match kind {
      MutationKind::Payments => &self.payments,
      MutationKind::Attendance => &self.attendance,
    }
  }

  pub fn len(&self) -> usize {
    self.payments.len() + self.attendance.len()
  }

  pub fn is_empty(&self) -> bool {
    self.payments.is_empty() && self.attendance.is_empty()
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResponse {
  #[serde(default)]
  pub results: UploadResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadResults {
  #[serde(default)]
  pub payments: KindResult,
  #[serde(default)]
  pub attendance: KindResult,
}

impl UploadResults {
  pub fn for_kind(&self, kind: MutationKind) -> &KindResult {
    match kind {
      MutationKind::Payments => &self.payments,
      MutationKind::Attendance => &self.attendance,
    }
  }
}

/// Outcome for one kind: applied keys, plus explicit rejections when the
/// server reports them. Keys in neither list were not processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindResult {
  #[serde(default)]
  pub success: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub failed: Vec<RejectedItem>,
}

impl KindResult {
  pub fn success<I, S>(keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      success: keys.into_iter().map(Into::into).collect(),
      failed: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedItem {
  pub idempotency_key: String,
  #[serde(default)]
  pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_response_without_failed_lists() {
    let body = r#"{"results":{"payments":{"success":["p1"]},"attendance":{"success":[]}}}"#;
    let response: UploadResponse = serde_json::from_str(body).unwrap();

    assert_eq!(response.results.payments.success, vec!["p1"]);
    assert!(response.results.payments.failed.is_empty());
    assert!(response.results.attendance.success.is_empty());
  }

  #[test]
  fn test_response_with_rejections_and_missing_kind() {
    let body = r#"{"results":{"payments":{"success":[],"failed":[{"idempotencyKey":"p2","reason":"fee not found"}]}}}"#;
    let response: UploadResponse = serde_json::from_str(body).unwrap();

    let failed = &response.results.for_kind(MutationKind::Payments).failed;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].idempotency_key, "p2");
    assert_eq!(failed[0].reason.as_deref(), Some("fee not found"));
    assert_eq!(response.results.attendance, KindResult::default());
  }
}
