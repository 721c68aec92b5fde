//! Event store repository
//!
//! Durable queue of pending events. All operations go through a single
//! connection guarded by a mutex, so `add`, `update` and `remove` are
//! individually atomic with respect to each other.

use crate::error::{Error, Result};
use crate::types::{EventId, EventRecord, EventType, NewEvent, Payload};
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // synchronous = FULL: an insert is on disk once `add` returns.
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn()
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("event store lock poisoned".to_string()))
    }

    // ============================================
    // Event operations
    // ============================================

    /// Durably persist a new event with zero attempts.
    pub fn add(&self, event: &NewEvent) -> Result<EventId> {
        let payload = serde_json::to_string(&event.payload)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO events (event_type, payload, attempt_count, created_at)
            VALUES (?1, ?2, 0, ?3)
            "#,
            params![
                event.event_type.as_str(),
                payload,
                event.created_at.to_rfc3339(),
            ],
        )?;
        Ok(EventId(conn.last_insert_rowid()))
    }

    /// Snapshot of pending events in insertion order.
    pub fn all(&self) -> Result<Vec<EventRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, payload, attempt_count, created_at FROM events ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Look up a single pending event.
    pub fn get(&self, id: EventId) -> Result<Option<EventRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, event_type, payload, attempt_count, created_at FROM events WHERE id = ?",
            [id.0],
            Self::row_to_record,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Record a new attempt count for an event.
    ///
    /// The stored count never decreases. Updating an event that was already
    /// removed is a no-op.
    pub fn update(&self, id: EventId, attempt_count: u32) -> Result<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE events SET attempt_count = MAX(attempt_count, ?2) WHERE id = ?1",
            params![id.0, attempt_count],
        )?;
        if changed == 0 {
            tracing::debug!(event_id = %id, "Update skipped, event already removed");
        }
        Ok(())
    }

    /// Delete an event. Returns whether it was still present.
    pub fn remove(&self, id: EventId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM events WHERE id = ?", [id.0])?;
        Ok(changed > 0)
    }

    /// Delete every pending event. Returns the number removed.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM events", [])?;
        Ok(removed)
    }

    /// Number of pending events
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Map a row without failing on bad column values.
    ///
    /// Only `id` must decode. Any other column that cannot be read turns the
    /// record into `Payload::Malformed`, so one corrupt row never fails a
    /// whole snapshot.
    fn row_to_record(row: &Row) -> rusqlite::Result<EventRecord> {
        let id = EventId(row.get("id")?);
        let mut defects: Vec<String> = Vec::new();

        let payload_raw = text_value(row.get_ref("payload")?).unwrap_or_else(|lossy| {
            defects.push("payload is not text".to_string());
            lossy
        });

        // Unknown types cannot be routed to an endpoint.
        let event_type = match text_value(row.get_ref("event_type")?) {
            Ok(text) => text.parse::<EventType>().unwrap_or_else(|e| {
                defects.push(e);
                EventType::TrackEvent
            }),
            Err(_) => {
                defects.push("event type is not text".to_string());
                EventType::TrackEvent
            }
        };

        let attempt_count = match row.get_ref("attempt_count")? {
            ValueRef::Integer(n) => u32::try_from(n).unwrap_or_else(|_| {
                defects.push(format!("attempt count {} out of range", n));
                if n < 0 {
                    0
                } else {
                    u32::MAX
                }
            }),
            _ => {
                defects.push("attempt count is not an integer".to_string());
                0
            }
        };

        // Unreadable timestamps get the epoch, never the read time, so the
        // record reads back the same on every call.
        let created_at = text_value(row.get_ref("created_at")?)
            .ok()
            .and_then(|text| parse_timestamp(&text))
            .unwrap_or_else(|| {
                defects.push("created_at is not a timestamp".to_string());
                DateTime::<Utc>::default()
            });

        let payload = if defects.is_empty() {
            Payload::from_stored(&payload_raw)
        } else {
            tracing::warn!(
                event_id = %id,
                defects = %defects.join("; "),
                "Stored event is malformed"
            );
            Payload::Malformed(payload_raw)
        };

        Ok(EventRecord {
            id,
            event_type,
            payload,
            attempt_count,
            created_at,
        })
    }

    // ============================================
    // Settings
    // ============================================

    /// Read a setting
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Insert or replace a setting
    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// UTF-8 text of a column, or a lossy rendering of whatever is stored.
fn text_value(value: ValueRef<'_>) -> std::result::Result<String, String> {
    match value {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Err(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(n) => Err(n.to_string()),
        ValueRef::Real(f) => Err(f.to_string()),
        ValueRef::Null => Err(String::new()),
    }
}

/// RFC 3339, or SQLite's own `YYYY-MM-DD HH:MM:SS` (UTC).
fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;
    use std::sync::Arc;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    fn test_event(name: &str) -> NewEvent {
        let mut props = Properties::new();
        props.insert("event_type".to_string(), name.into());
        props.insert("platform".to_string(), "linux".into());
        NewEvent::new(EventType::TrackEvent, props)
    }

    #[test]
    fn test_add_and_all_preserve_insertion_order() {
        let db = test_db();
        let a = db.add(&test_event("a")).unwrap();
        let b = db.add(&test_event("b")).unwrap();
        let c = db.add(&test_event("c")).unwrap();
        assert!(a < b && b < c);

        let records = db.all().unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![a, b, c]);
        assert!(records.iter().all(|r| r.attempt_count == 0));

        let props = records[1].payload.properties().unwrap();
        assert_eq!(props["event_type"], "b");
        let keys: Vec<_> = props.keys().cloned().collect();
        assert_eq!(keys, vec!["event_type", "platform"]);
    }

    #[test]
    fn test_update_increments_and_never_decreases() {
        let db = test_db();
        let id = db.add(&test_event("a")).unwrap();

        db.update(id, 2).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().attempt_count, 2);

        db.update(id, 1).unwrap();
        assert_eq!(db.get(id).unwrap().unwrap().attempt_count, 2);
    }

    #[test]
    fn test_update_after_remove_is_noop() {
        let db = test_db();
        let id = db.add(&test_event("a")).unwrap();

        assert!(db.remove(id).unwrap());
        db.update(id, 1).unwrap();
        assert!(db.get(id).unwrap().is_none());
        assert!(!db.remove(id).unwrap());
    }

    #[test]
    fn test_clear_and_count() {
        let db = test_db();
        for name in ["a", "b", "c"] {
            db.add(&test_event(name)).unwrap();
        }
        assert_eq!(db.count().unwrap(), 3);
        assert_eq!(db.clear().unwrap(), 3);
        assert_eq!(db.count().unwrap(), 0);
        assert!(db.all().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_rows_surface_as_malformed() {
        let db = test_db();
        let good = db.add(&test_event("a")).unwrap();
        {
            let conn = db.connection().unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, created_at) VALUES ('track_event', '{broken', ?1)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, created_at) VALUES ('mystery', '{}', ?1)",
                [Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let records = db.all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, good);
        assert!(matches!(records[0].payload, Payload::Properties(_)));
        assert!(matches!(records[1].payload, Payload::Malformed(_)));
        assert!(matches!(records[2].payload, Payload::Malformed(_)));
    }

    #[test]
    fn test_undecodable_columns_do_not_fail_snapshot() {
        let db = test_db();
        let first = db.add(&test_event("a")).unwrap();
        let now = Utc::now().to_rfc3339();
        {
            let conn = db.connection().unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, created_at) VALUES ('track_event', X'00FF', ?1)",
                [&now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, attempt_count, created_at) VALUES ('track_event', '{}', -1, ?1)",
                [&now],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, attempt_count, created_at) VALUES ('track_event', '{}', 5000000000, ?1)",
                [&now],
            )
            .unwrap();
        }
        let last = db.add(&test_event("b")).unwrap();

        let records = db.all().unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].id, first);
        assert_eq!(records[4].id, last);
        assert!(matches!(records[0].payload, Payload::Properties(_)));
        assert!(matches!(records[4].payload, Payload::Properties(_)));
        for record in &records[1..4] {
            assert!(
                matches!(record.payload, Payload::Malformed(_)),
                "row {} should be malformed",
                record.id
            );
        }
        assert_eq!(records[2].attempt_count, 0);
        assert_eq!(records[3].attempt_count, u32::MAX);

        let blob = db.get(records[1].id).unwrap().unwrap();
        assert!(matches!(blob.payload, Payload::Malformed(_)));
    }

    #[test]
    fn test_unparseable_created_at_is_stable_and_malformed() {
        let db = test_db();
        {
            let conn = db.connection().unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, created_at) VALUES ('track_event', '{}', 'garbage')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO events (event_type, payload, created_at) VALUES ('track_event', '{}', '2026-03-01 10:20:30')",
                [],
            )
            .unwrap();
        }

        let first = db.all().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = db.all().unwrap();
        assert_eq!(first, second);

        assert!(matches!(first[0].payload, Payload::Malformed(_)));
        assert_eq!(first[0].created_at, DateTime::<Utc>::default());

        assert!(matches!(first[1].payload, Payload::Properties(_)));
        assert_eq!(
            first[1].created_at.to_rfc3339(),
            "2026-03-01T10:20:30+00:00"
        );
    }

    #[test]
    fn test_concurrent_producers() {
        let db = Arc::new(test_db());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let db = Arc::clone(&db);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        db.add(&test_event(&format!("t{}-{}", t, i))).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let records = db.all().unwrap();
        assert_eq!(records.len(), 100);
        assert!(records.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_settings() {
        let db = test_db();
        assert!(db.get_setting("cookie").unwrap().is_none());
        db.put_setting("cookie", "abc").unwrap();
        db.put_setting("cookie", "def").unwrap();
        assert_eq!(db.get_setting("cookie").unwrap().as_deref(), Some("def"));
    }
}
