//! Domain types for queued offline mutations and cached reference records.
//!
//! Field names serialize in camelCase to match the campus API.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Queued mutations
// ============================================================================

/// Which offline queue a mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
  Payments,
  Attendance,
}

impl MutationKind {
  pub const ALL: [MutationKind; 2] = [MutationKind::Payments, MutationKind::Attendance];

  pub fn as_str(&self) -> &'static str {
    match self {
      MutationKind::Payments => "payments",
      MutationKind::Attendance => "attendance",
    }
  }
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for MutationKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "payments" | "payment" => Ok(MutationKind::Payments),
      "attendance" => Ok(MutationKind::Attendance),
      other => Err(format!("unknown mutation kind '{}'", other)),
    }
  }
}

/// Lifecycle of a queued mutation.
///
/// Only `Pending -> Synced` and `Pending -> Failed` happen during sync.
/// `Failed -> Pending` is a manual re-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
  Pending,
  Synced,
  Failed,
}

impl ItemStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      ItemStatus::Pending => "pending",
      ItemStatus::Synced => "synced",
      ItemStatus::Failed => "failed",
    }
  }
}

impl fmt::Display for ItemStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for ItemStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(ItemStatus::Pending),
      "synced" => Ok(ItemStatus::Synced),
      "failed" => Ok(ItemStatus::Failed),
      other => Err(format!("unknown sync status '{}'", other)),
    }
  }
}

/// A fee payment captured by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
  pub student_id: String,
  pub fee_id: String,
  pub amount_paid: f64,
  pub payment_method: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remarks: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMark {
  Present,
  Absent,
  Late,
  Leave,
}

impl FromStr for AttendanceMark {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "present" | "p" => Ok(AttendanceMark::Present),
      "absent" | "a" => Ok(AttendanceMark::Absent),
      "late" | "l" => Ok(AttendanceMark::Late),
      "leave" => Ok(AttendanceMark::Leave),
      other => Err(format!("unknown attendance status '{}'", other)),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceEntry {
  pub student_id: String,
  pub status: AttendanceMark,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remarks: Option<String>,
}

/// One class/section register for a single day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePayload {
  pub date: NaiveDate,
  pub class_id: String,
  pub section_id: String,
  pub records: Vec<AttendanceEntry>,
}

/// Domain fields of a mutation; flattened into the queued item on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MutationPayload {
  Payment(PaymentPayload),
  Attendance(AttendancePayload),
}

impl MutationPayload {
  pub fn kind(&self) -> MutationKind {
    match self {
      MutationPayload::Payment(_) => MutationKind::Payments,
      MutationPayload::Attendance(_) => MutationKind::Attendance,
    }
  }

  /// Decode a stored payload whose kind is already known.
  pub fn from_json(kind: MutationKind, json: &str) -> serde_json::Result<Self> {
    Ok(match kind {
      MutationKind::Payments => MutationPayload::Payment(serde_json::from_str(json)?),
      MutationKind::Attendance => MutationPayload::Attendance(serde_json::from_str(json)?),
    })
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    match self {
      MutationPayload::Payment(p) => serde_json::to_string(p),
      MutationPayload::Attendance(a) => serde_json::to_string(a),
    }
  }
}

/// A locally persisted write awaiting confirmation from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedMutation {
  pub idempotency_key: String,
  pub created_at_local: DateTime<Utc>,
  pub sync_status: ItemStatus,
  /// When the status last changed locally
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status_changed_at: Option<DateTime<Utc>>,
  /// Server-supplied reason for a rejection
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
  #[serde(flatten)]
  pub payload: MutationPayload,
}

impl QueuedMutation {
  /// Capture a new pending mutation with a fresh idempotency key.
  pub fn new(payload: MutationPayload) -> Self {
    Self::with_key(Uuid::new_v4().to_string(), payload)
  }

  /// Capture a new pending mutation under a caller-chosen key.
  pub fn with_key(idempotency_key: impl Into<String>, payload: MutationPayload) -> Self {
    Self {
      idempotency_key: idempotency_key.into(),
      created_at_local: Utc::now(),
      sync_status: ItemStatus::Pending,
      status_changed_at: None,
      last_error: None,
      payload,
    }
  }

  pub fn payment(payload: PaymentPayload) -> Self {
    Self::new(MutationPayload::Payment(payload))
  }

  pub fn attendance(payload: AttendancePayload) -> Self {
    Self::new(MutationPayload::Attendance(payload))
  }

  pub fn kind(&self) -> MutationKind {
    self.payload.kind()
  }
}

// ============================================================================
// Cached reference records
// ============================================================================

/// Records mirrored from the server and refreshed by snapshot.
pub trait ReferenceRecord: Clone + Send + Sync + Serialize + serde::de::DeserializeOwned {
  /// Server-issued primary key
  fn cache_key(&self) -> &str;

  /// Storage partition name (e.g., "student", "fee")
  fn entity_type() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStudent {
  #[serde(flatten, with = "server_id")]
  pub id: String,
  #[serde(default)]
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub roll_number: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub class_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub section_id: Option<String>,
  /// Any other server fields, kept verbatim
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ReferenceRecord for CachedStudent {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "student"
  }
}

/// A fee challan as last seen on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFee {
  #[serde(flatten, with = "server_id")]
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub student_id: Option<String>,
  #[serde(default)]
  pub amount: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl ReferenceRecord for CachedFee {
  fn cache_key(&self) -> &str {
    &self.id
  }

  fn entity_type() -> &'static str {
    "fee"
  }
}

/// Primary key of a reference record.
///
/// Written as `_id`. Read from `_id`, `id`, or both (virtual ids), with `_id`
/// taking precedence. Must be declared before any flattened `extra` map so
/// neither key lands there.
mod server_id {
  use serde::de::Error as _;
  use serde::ser::SerializeMap;
  use serde::{Deserialize, Deserializer, Serializer};

  #[derive(Deserialize)]
  struct Keys {
    #[serde(rename = "_id")]
    primary: Option<String>,
    id: Option<String>,
  }

  pub fn serialize<S: Serializer>(id: &str, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry("_id", id)?;
    map.end()
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let keys = Keys::deserialize(deserializer)?;
    keys
      .primary
      .or(keys.id)
      .ok_or_else(|| D::Error::missing_field("_id"))
  }
}

/// Full reference set returned by the download endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSnapshot {
  #[serde(default)]
  pub students: Vec<CachedStudent>,
  #[serde(default)]
  pub fees: Vec<CachedFee>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_payment_item_wire_shape() {
    let item = QueuedMutation::with_key(
      "p1",
      MutationPayload::Payment(PaymentPayload {
        student_id: "s1".into(),
        fee_id: "f1".into(),
        amount_paid: 500.0,
        payment_method: "cash".into(),
        remarks: None,
      }),
    );

    let value = serde_json::to_value(&item).unwrap();
    assert_eq!(value["idempotencyKey"], "p1");
    assert_eq!(value["syncStatus"], "pending");
    assert_eq!(value["studentId"], "s1");
    assert_eq!(value["amountPaid"], 500.0);
    assert!(value.get("remarks").is_none());
    assert!(value.get("lastError").is_none());
  }

  #[test]
  fn test_attendance_item_decodes_untagged() {
    let value = json!({
      "idempotencyKey": "a1",
      "createdAtLocal": "2026-03-02T08:00:00Z",
      "syncStatus": "pending",
      "date": "2026-03-02",
      "classId": "c1",
      "sectionId": "A",
      "records": [{ "studentId": "s1", "status": "absent" }]
    });

    let item: QueuedMutation = serde_json::from_value(value).unwrap();
    assert_eq!(item.kind(), MutationKind::Attendance);
    match item.payload {
      MutationPayload::Attendance(a) => {
        assert_eq!(a.records.len(), 1);
        assert_eq!(a.records[0].status, AttendanceMark::Absent);
      }
      other => panic!("unexpected payload {:?}", other),
    }
  }

  #[test]
  fn test_reference_records_keep_unknown_fields() {
    let student: CachedStudent = serde_json::from_value(json!({
      "_id": "s1",
      "name": "Ayesha",
      "rollNumber": "12",
      "guardianPhone": "0300"
    }))
    .unwrap();
    assert_eq!(student.cache_key(), "s1");
    assert_eq!(student.extra["guardianPhone"], "0300");

    let fee: CachedFee = serde_json::from_value(json!({ "id": "f1", "amount": 1200 })).unwrap();
    assert_eq!(fee.id, "f1");
    assert_eq!(fee.amount, 1200.0);
  }

  #[test]
  fn test_virtual_id_alongside_primary_key() {
    let snapshot: ReferenceSnapshot = serde_json::from_value(json!({
      "students": [{ "_id": "s1", "id": "s1", "name": "Ayesha" }],
      "fees": [{ "_id": "f1", "id": "f1", "studentId": "s1", "amount": 800 }]
    }))
    .unwrap();

    let student = &snapshot.students[0];
    assert_eq!(student.id, "s1");
    assert!(student.extra.is_empty());
    assert_eq!(snapshot.fees[0].id, "f1");

    let value = serde_json::to_value(student).unwrap();
    assert_eq!(value["_id"], "s1");
    assert!(value.get("id").is_none());
  }

  #[test]
  fn test_record_without_any_id_is_rejected() {
    let result = serde_json::from_value::<CachedStudent>(json!({ "name": "Nobody" }));
    assert!(result.unwrap_err().to_string().contains("_id"));
  }

  #[test]
  fn test_kind_parsing() {
    assert_eq!("Payments".parse::<MutationKind>(), Ok(MutationKind::Payments));
    assert_eq!("attendance".parse::<MutationKind>(), Ok(MutationKind::Attendance));
    assert!("fees".parse::<MutationKind>().is_err());
  }
}
