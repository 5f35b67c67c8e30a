//! Schema migrations, applied in order and tracked in `PRAGMA user_version`.

/// Each entry upgrades the database from version `index` to `index + 1`.
pub const MIGRATIONS: &[&str] = &[
  // v1: offline queue and reference cache
  r#"
CREATE TABLE IF NOT EXISTS queued_mutations (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    idempotency_key TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at_local TEXT NOT NULL,
    sync_status TEXT NOT NULL DEFAULT 'pending',
    status_changed_at TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_queued_mutations_status
    ON queued_mutations(kind, sync_status, seq);

CREATE TABLE IF NOT EXISTS reference_cache (
    entity_type TEXT NOT NULL,
    entity_key TEXT NOT NULL,
    data BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_key)
);
"#,
];
