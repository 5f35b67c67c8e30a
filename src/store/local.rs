//! SQLite implementation of the local store.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::events::{PendingCounts, StoreEvent};
use super::schema::MIGRATIONS;
use crate::error::{Error, Result};
use crate::model::{
  AttendancePayload, CachedFee, CachedStudent, ItemStatus, MutationKind, MutationPayload,
  PaymentPayload, QueuedMutation, ReferenceRecord, ReferenceSnapshot,
};

const EVENT_CAPACITY: usize = 64;

const MUTATION_COLUMNS: &str =
  "idempotency_key, kind, payload, created_at_local, sync_status, status_changed_at, last_error";

/// Durable store for the offline queue and the reference caches.
///
/// The connection is guarded by a mutex that is held for one call at a time
/// and never across an `.await`.
pub struct LocalStore {
  conn: Mutex<Connection>,
  events: broadcast::Sender<StoreEvent>,
  counts: watch::Sender<PendingCounts>,
}

impl LocalStore {
  /// Open or create the store at `path`, applying pending migrations.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    let store = Self::from_connection(conn)?;
    info!(path = %path.display(), "opened local store");
    Ok(store)
  }

  /// Open a throwaway store, used by tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(mut conn: Connection) -> Result<Self> {
    run_migrations(&mut conn)?;
    let counts = count_rows(&conn)?;

    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let (counts, _) = watch::channel(counts);

    Ok(Self {
      conn: Mutex::new(conn),
      events,
      counts,
    })
  }

  fn lock(&self) -> MutexGuard<'_, Connection> {
    self.conn.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // --------------------------------------------------------------------------
  // Subscriptions
  // --------------------------------------------------------------------------

  /// Receive an event after every committed queue or cache write.
  pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
    self.events.subscribe()
  }

  /// Live view of the queue counts; the receiver always holds the latest value.
  pub fn watch_counts(&self) -> watch::Receiver<PendingCounts> {
    self.counts.subscribe()
  }

  /// Called after commit, so a counting failure must not fail the write.
  fn publish_queue_change(&self, conn: &Connection, kind: MutationKind) {
    match count_rows(conn) {
      Ok(counts) => {
        self.counts.send_replace(counts);
      }
      Err(e) => warn!(error = %e, %kind, "failed to refresh queue counts"),
    }
    // No receivers is fine
    let _ = self.events.send(StoreEvent::QueueChanged { kind });
  }

  // --------------------------------------------------------------------------
  // Offline queue
  // --------------------------------------------------------------------------

  /// Insert a mutation as `pending`.
  ///
  /// Returns `false` when a row with the same idempotency key already exists;
  /// the existing row is left untouched.
  pub fn enqueue(&self, mutation: &QueuedMutation) -> Result<bool> {
    let kind = mutation.kind();
    let payload = mutation.payload.to_json()?;
    let conn = self.lock();

    let inserted = conn.execute(
      "INSERT OR IGNORE INTO queued_mutations
         (idempotency_key, kind, payload, created_at_local, sync_status)
       VALUES (?1, ?2, ?3, ?4, ?5)",
      params![
        mutation.idempotency_key,
        kind,
        payload,
        mutation.created_at_local,
        ItemStatus::Pending
      ],
    )? > 0;

    if inserted {
      debug!(key = %mutation.idempotency_key, %kind, "queued offline mutation");
      self.publish_queue_change(&conn, kind);
    } else {
      debug!(key = %mutation.idempotency_key, "mutation already queued");
    }

    Ok(inserted)
  }

  /// Queue a payment under a fresh idempotency key.
  pub fn enqueue_payment(&self, payload: PaymentPayload) -> Result<QueuedMutation> {
    let mutation = QueuedMutation::payment(payload);
    self.enqueue(&mutation)?;
    Ok(mutation)
  }

  /// Queue an attendance register under a fresh idempotency key.
  pub fn enqueue_attendance(&self, payload: AttendancePayload) -> Result<QueuedMutation> {
    let mutation = QueuedMutation::attendance(payload);
    self.enqueue(&mutation)?;
    Ok(mutation)
  }

  /// Pending mutations of one kind, oldest first.
  ///
  /// Re-running returns the same set until a status changes.
  pub fn list_pending(&self, kind: MutationKind) -> Result<Vec<QueuedMutation>> {
    self.list_by_status(kind, ItemStatus::Pending)
  }

  pub fn list_by_status(
    &self,
    kind: MutationKind,
    status: ItemStatus,
  ) -> Result<Vec<QueuedMutation>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {} FROM queued_mutations WHERE kind = ?1 AND sync_status = ?2 ORDER BY seq",
      MUTATION_COLUMNS
    ))?;

    let rows = stmt
      .query_map(params![kind, status], mutation_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  /// Every mutation of one kind regardless of status, oldest first.
  pub fn history(&self, kind: MutationKind) -> Result<Vec<QueuedMutation>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(&format!(
      "SELECT {} FROM queued_mutations WHERE kind = ?1 ORDER BY seq",
      MUTATION_COLUMNS
    ))?;

    let rows = stmt
      .query_map(params![kind], mutation_from_row)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(rows)
  }

  pub fn get(&self, key: &str) -> Result<Option<QueuedMutation>> {
    let conn = self.lock();
    let mutation = conn
      .query_row(
        &format!(
          "SELECT {} FROM queued_mutations WHERE idempotency_key = ?1",
          MUTATION_COLUMNS
        ),
        params![key],
        mutation_from_row,
      )
      .optional()?;

    Ok(mutation)
  }

  /// Mark a pending mutation as applied by the server.
  ///
  /// Returns `false` if the key is unknown or the item was not pending.
  pub fn mark_synced(&self, key: &str) -> Result<bool> {
    self.mark_synced_many(&[key.to_string()]).map(|n| n > 0)
  }

  /// Mark a pending mutation as permanently rejected.
  pub fn mark_failed(&self, key: &str, reason: Option<&str>) -> Result<bool> {
    self
      .mark_failed_many(&[(key.to_string(), reason.map(String::from))])
      .map(|n| n > 0)
  }

  /// Mark several pending mutations as synced in one transaction.
  pub fn mark_synced_many(&self, keys: &[String]) -> Result<usize> {
    let updates: Vec<(&str, Option<&str>)> = keys.iter().map(|k| (k.as_str(), None)).collect();
    self.transition_many(&updates, ItemStatus::Synced)
  }

  /// Mark several pending mutations as failed in one transaction.
  pub fn mark_failed_many(&self, items: &[(String, Option<String>)]) -> Result<usize> {
    let updates: Vec<(&str, Option<&str>)> = items
      .iter()
      .map(|(k, reason)| (k.as_str(), reason.as_deref()))
      .collect();
    self.transition_many(&updates, ItemStatus::Failed)
  }

  fn transition_many(&self, updates: &[(&str, Option<&str>)], to: ItemStatus) -> Result<usize> {
    if updates.is_empty() {
      return Ok(0);
    }

    let mut conn = self.lock();
    let tx = conn.transaction()?;
    let now = Utc::now();
    let mut changed_kinds = Vec::new();

    for (key, reason) in updates {
      if let Some(kind) = transition_pending(&tx, key, to, *reason, now)? {
        changed_kinds.push(kind);
      }
    }
    tx.commit()?;

    let changed = changed_kinds.len();
    changed_kinds.sort_by_key(|k| k.as_str());
    changed_kinds.dedup();
    for kind in changed_kinds {
      self.publish_queue_change(&conn, kind);
    }

    Ok(changed)
  }

  /// Manually return a failed mutation to the pending queue.
  ///
  /// Returns `false` if it is already pending. Synced items cannot be re-queued.
  pub fn requeue(&self, key: &str) -> Result<bool> {
    let conn = self.lock();
    let current: Option<(MutationKind, ItemStatus)> = conn
      .query_row(
        "SELECT kind, sync_status FROM queued_mutations WHERE idempotency_key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match current {
      None => Err(Error::NotFound(key.to_string())),
      Some((_, ItemStatus::Pending)) => Ok(false),
      Some((_, ItemStatus::Synced)) => Err(Error::InvalidTransition {
        key: key.to_string(),
        status: ItemStatus::Synced.to_string(),
        expected: ItemStatus::Failed.to_string(),
      }),
      Some((kind, ItemStatus::Failed)) => {
        conn.execute(
          "UPDATE queued_mutations
           SET sync_status = ?1, status_changed_at = ?2, last_error = NULL
           WHERE idempotency_key = ?3",
          params![ItemStatus::Pending, Utc::now(), key],
        )?;
        info!(%key, %kind, "re-queued failed mutation");
        self.publish_queue_change(&conn, kind);
        Ok(true)
      }
    }
  }

  pub fn pending_counts(&self) -> Result<PendingCounts> {
    let conn = self.lock();
    count_rows(&conn)
  }

  // --------------------------------------------------------------------------
  // Reference caches
  // --------------------------------------------------------------------------

  /// Insert-or-replace every student and fee in one transaction.
  ///
  /// Records missing from the snapshot are kept.
  pub fn upsert_reference(&self, snapshot: &ReferenceSnapshot) -> Result<()> {
    let mut conn = self.lock();
    let tx = conn.transaction()?;
    let now = Utc::now();

    upsert_records(&tx, &snapshot.students, now)?;
    upsert_records(&tx, &snapshot.fees, now)?;
    tx.commit()?;

    info!(
      students = snapshot.students.len(),
      fees = snapshot.fees.len(),
      "reference cache refreshed"
    );
    let _ = self.events.send(StoreEvent::ReferencesRefreshed {
      students: snapshot.students.len(),
      fees: snapshot.fees.len(),
    });

    Ok(())
  }

  /// All cached records of one type, ordered by key.
  pub fn list_references<T: ReferenceRecord>(&self) -> Result<Vec<T>> {
    let conn = self.lock();
    let mut stmt = conn.prepare(
      "SELECT data FROM reference_cache WHERE entity_type = ?1 ORDER BY entity_key",
    )?;

    let blobs = stmt
      .query_map(params![T::entity_type()], |row| row.get::<_, Vec<u8>>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    blobs
      .iter()
      .map(|data| serde_json::from_slice(data).map_err(Error::from))
      .collect()
  }

  pub fn get_reference<T: ReferenceRecord>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock();
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM reference_cache WHERE entity_type = ?1 AND entity_key = ?2",
        params![T::entity_type(), key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  pub fn students(&self) -> Result<Vec<CachedStudent>> {
    self.list_references()
  }

  pub fn fees(&self) -> Result<Vec<CachedFee>> {
    self.list_references()
  }

  pub fn student(&self, id: &str) -> Result<Option<CachedStudent>> {
    self.get_reference(id)
  }

  pub fn fees_for_student(&self, student_id: &str) -> Result<Vec<CachedFee>> {
    Ok(
      self
        .fees()?
        .into_iter()
        .filter(|fee| fee.student_id.as_deref() == Some(student_id))
        .collect(),
    )
  }

  /// When the reference cache was last written, if ever.
  pub fn last_refreshed(&self) -> Result<Option<DateTime<Utc>>> {
    let conn = self.lock();
    let at = conn.query_row("SELECT MAX(cached_at) FROM reference_cache", [], |row| {
      row.get::<_, Option<DateTime<Utc>>>(0)
    })?;
    Ok(at)
  }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
  let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

  for (index, migration) in MIGRATIONS.iter().enumerate().skip(version as usize) {
    let tx = conn.transaction()?;
    tx.execute_batch(migration)?;
    tx.pragma_update(None, "user_version", (index + 1) as i64)?;
    tx.commit()?;
    info!(version = index + 1, "applied local store migration");
  }

  Ok(())
}

fn transition_pending(
  tx: &Transaction<'_>,
  key: &str,
  to: ItemStatus,
  reason: Option<&str>,
  now: DateTime<Utc>,
) -> rusqlite::Result<Option<MutationKind>> {
  tx.query_row(
    "UPDATE queued_mutations
     SET sync_status = ?1, status_changed_at = ?2, last_error = ?3
     WHERE idempotency_key = ?4 AND sync_status = ?5
     RETURNING kind",
    params![to, now, reason, key, ItemStatus::Pending],
    |row| row.get(0),
  )
  .optional()
}

fn upsert_records<T: ReferenceRecord>(
  tx: &Transaction<'_>,
  records: &[T],
  now: DateTime<Utc>,
) -> Result<()> {
  let mut stmt = tx.prepare_cached(
    "INSERT OR REPLACE INTO reference_cache (entity_type, entity_key, data, cached_at)
     VALUES (?1, ?2, ?3, ?4)",
  )?;

  for record in records {
    let data = serde_json::to_vec(record)?;
    stmt.execute(params![T::entity_type(), record.cache_key(), data, now])?;
  }

  Ok(())
}

fn count_rows(conn: &Connection) -> Result<PendingCounts> {
  let mut stmt = conn.prepare(
    "SELECT kind, sync_status, COUNT(*) FROM queued_mutations
     WHERE sync_status != 'synced'
     GROUP BY kind, sync_status",
  )?;

  let rows = stmt
    .query_map([], |row| {
      Ok((
        row.get::<_, MutationKind>(0)?,
        row.get::<_, ItemStatus>(1)?,
        row.get::<_, i64>(2)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut counts = PendingCounts::default();
  for (kind, status, n) in rows {
    let n = n as usize;
    match (kind, status) {
      (MutationKind::Payments, ItemStatus::Pending) => counts.pending_payments = n,
      (MutationKind::Attendance, ItemStatus::Pending) => counts.pending_attendance = n,
      (MutationKind::Payments, ItemStatus::Failed) => counts.failed_payments = n,
      (MutationKind::Attendance, ItemStatus::Failed) => counts.failed_attendance = n,
      (_, ItemStatus::Synced) => {}
    }
  }

  Ok(counts)
}

fn mutation_from_row(row: &Row<'_>) -> rusqlite::Result<QueuedMutation> {
  let kind: MutationKind = row.get(1)?;
  let payload: String = row.get(2)?;
  let payload = MutationPayload::from_json(kind, &payload)
    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

  Ok(QueuedMutation {
    idempotency_key: row.get(0)?,
    created_at_local: row.get(3)?,
    sync_status: row.get(4)?,
    status_changed_at: row.get(5)?,
    last_error: row.get(6)?,
    payload,
  })
}

// ============================================================================
// Column conversions
// ============================================================================

impl ToSql for MutationKind {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(self.as_str().into())
  }
}

impl FromSql for MutationKind {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    value
      .as_str()?
      .parse()
      .map_err(|e: String| FromSqlError::Other(e.into()))
  }
}

impl ToSql for ItemStatus {
  fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
    Ok(self.as_str().into())
  }
}

impl FromSql for ItemStatus {
  fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
    value
      .as_str()?
      .parse()
      .map_err(|e: String| FromSqlError::Other(e.into()))
  }
}
