// src/store/event_store.rs
//! SQLite-backed event queue and settings table
//!
//! Events are immutable once stored; insertion order is delivery order, and
//! rows are removed only after confirmed delivery. Opening an existing
//! database is idempotent and loses nothing.

use crate::utils::errors::{Result, SdkError};
use crate::utils::ids;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

const DB_FILE: &str = "events.db";

/// One pending event as returned by [`EventStore::dequeue_batch`]
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Store-assigned unique id, used to confirm removal after delivery
    pub id: String,

    /// The serialized event document
    pub payload: serde_json::Value,
}

/// Durable event queue plus settings key/value table
pub struct EventStore {
    conn: Mutex<Connection>,
    max_queue_size: usize,
}

impl EventStore {
    /// Open (or create) the store under `dir`.
    ///
    /// Creates the directory recursively if absent and the schema if missing.
    pub fn open(dir: &Path, max_queue_size: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| SdkError::InitFailed(format!("Failed to create data directory: {}", e)))?;

        let db_path = dir.join(DB_FILE);
        let conn = Connection::open(&db_path)
            .map_err(|e| SdkError::InitFailed(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            max_queue_size,
        };
        store.create_schema()?;

        info!("Event store opened at {:?}", db_path);
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS super_properties (
                key TEXT PRIMARY KEY,
                value_json TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| SdkError::InitFailed(format!("Schema creation failed: {}", e)))
    }

    /// Append an event to the durable queue.
    ///
    /// Assigns a fresh id and stamps the wall-clock insertion time used for
    /// ordering. Fails with [`SdkError::QueueFull`] once the configured
    /// capacity is reached; nothing is evicted.
    pub fn enqueue(&self, payload: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(|e| SdkError::StorageFailed(format!("Queue count failed: {}", e)))?;
        if count as usize >= self.max_queue_size {
            return Err(SdkError::QueueFull);
        }

        conn.execute(
            "INSERT INTO events (id, payload, created_at) VALUES (?1, ?2, ?3)",
            params![ids::new_uuid(), payload.to_string(), ids::epoch_ms()],
        )
        .map_err(|e| SdkError::StorageFailed(format!("Enqueue failed: {}", e)))?;

        Ok(())
    }

    /// Return up to `max_count` oldest events without removing them
    pub fn dequeue_batch(&self, max_count: usize) -> Result<Vec<QueuedEvent>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(
                "SELECT id, payload FROM events ORDER BY created_at ASC, rowid ASC LIMIT ?1",
            )
            .map_err(|e| SdkError::StorageFailed(format!("Dequeue prepare failed: {}", e)))?;

        let rows = stmt
            .query_map(params![max_count as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| SdkError::StorageFailed(format!("Dequeue query failed: {}", e)))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, raw) =
                row.map_err(|e| SdkError::StorageFailed(format!("Dequeue row failed: {}", e)))?;
            match serde_json::from_str(&raw) {
                Ok(payload) => events.push(QueuedEvent { id, payload }),
                Err(e) => {
                    // Corrupt rows are skipped, never delivered and never fatal
                    warn!("Skipping unparseable queued event {}: {}", id, e);
                }
            }
        }
        Ok(events)
    }

    /// Delete exactly the given ids; unknown ids are a no-op
    pub fn remove(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM events WHERE id IN ({})", placeholders);
        conn.execute(&sql, params_from_iter(ids.iter()))
            .map_err(|e| SdkError::StorageFailed(format!("Remove failed: {}", e)))?;
        Ok(())
    }

    /// Current queue length
    pub fn size(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .map_err(|e| SdkError::StorageFailed(format!("Queue count failed: {}", e)))?;
        Ok(count as usize)
    }

    // Settings: last-write-wins scalar values.

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )
        .map_err(|e| SdkError::StorageFailed(format!("Set setting '{}' failed: {}", key, e)))?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT value FROM settings WHERE key = ?1")
            .map_err(|e| SdkError::StorageFailed(format!("Get setting prepare failed: {}", e)))?;
        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .map_err(|e| SdkError::StorageFailed(format!("Get setting '{}' failed: {}", key, e)))?;
        match rows.next() {
            Some(value) => value
                .map(Some)
                .map_err(|e| SdkError::StorageFailed(format!("Get setting row failed: {}", e))),
            None => Ok(None),
        }
    }

    pub fn set_distinct_id(&self, distinct_id: &str) -> Result<()> {
        self.set_setting("distinct_id", distinct_id)
    }

    pub fn distinct_id(&self) -> Result<Option<String>> {
        self.get_setting("distinct_id")
    }

    pub fn set_session_id(&self, session_id: &str) -> Result<()> {
        self.set_setting("session_id", session_id)
    }

    pub fn session_id(&self) -> Result<Option<String>> {
        self.get_setting("session_id")
    }

    /// Stable installation identity, generated and persisted on first read
    pub fn get_or_create_distinct_id(&self) -> Result<String> {
        if let Some(distinct_id) = self.distinct_id()? {
            if !distinct_id.is_empty() {
                return Ok(distinct_id);
            }
        }
        let distinct_id = ids::new_uuid();
        self.set_distinct_id(&distinct_id)?;
        Ok(distinct_id)
    }

    /// Current session identity, generated and persisted on first read
    pub fn get_or_create_session_id(&self) -> Result<String> {
        if let Some(session_id) = self.session_id()? {
            if !session_id.is_empty() {
                return Ok(session_id);
            }
        }
        let session_id = ids::new_uuid();
        self.set_session_id(&session_id)?;
        Ok(session_id)
    }

    pub fn set_opt_out(&self, opt_out: bool) -> Result<()> {
        self.set_setting("opt_out", if opt_out { "1" } else { "0" })
    }

    /// Opt-out flag; absent means opted in
    pub fn opt_out(&self) -> Result<bool> {
        Ok(self.get_setting("opt_out")?.as_deref() == Some("1"))
    }

    pub fn set_feature_flags(&self, flags_json: &str) -> Result<()> {
        self.set_setting("feature_flags", flags_json)
    }

    /// Last persisted feature flag response, `{}` if never stored
    pub fn feature_flags(&self) -> Result<String> {
        Ok(self
            .get_setting("feature_flags")?
            .unwrap_or_else(|| "{}".to_string()))
    }

    // Super properties: merged into every captured event.

    pub fn set_super_property(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO super_properties (key, value_json) VALUES (?1, ?2)",
            params![key, value.to_string()],
        )
        .map_err(|e| SdkError::StorageFailed(format!("Set super property failed: {}", e)))?;
        Ok(())
    }

    pub fn remove_super_property(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM super_properties WHERE key = ?1", params![key])
            .map_err(|e| SdkError::StorageFailed(format!("Remove super property failed: {}", e)))?;
        Ok(())
    }

    pub fn clear_super_properties(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM super_properties", [])
            .map_err(|e| SdkError::StorageFailed(format!("Clear super properties failed: {}", e)))?;
        Ok(())
    }

    /// All registered super properties, values parsed as JSON with plain
    /// strings as the fallback
    pub fn super_properties(&self) -> Result<HashMap<String, serde_json::Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT key, value_json FROM super_properties")
            .map_err(|e| SdkError::StorageFailed(format!("Super property query failed: {}", e)))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| SdkError::StorageFailed(format!("Super property query failed: {}", e)))?;

        let mut properties = HashMap::new();
        for row in rows {
            let (key, raw) = row
                .map_err(|e| SdkError::StorageFailed(format!("Super property row failed: {}", e)))?;
            let value = serde_json::from_str(&raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            properties.insert(key, value);
        }
        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open_store(dir: &Path) -> EventStore {
        EventStore::open(dir, 1000).unwrap()
    }

    #[test]
    fn test_open_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        let store = EventStore::open(&nested, 10);
        assert!(store.is_ok());
        assert!(nested.join(DB_FILE).exists());
    }

    #[test]
    fn test_enqueue_dequeue_remove_size() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        for i in 0..5 {
            store.enqueue(&json!({"event": format!("e{}", i)})).unwrap();
        }
        assert_eq!(store.size().unwrap(), 5);

        let batch = store.dequeue_batch(3).unwrap();
        assert_eq!(batch.len(), 3);
        // Non-destructive read
        assert_eq!(store.size().unwrap(), 5);

        let ids: Vec<String> = batch.iter().map(|e| e.id.clone()).collect();
        store.remove(&ids).unwrap();
        assert_eq!(store.size().unwrap(), 2);

        // Removed ids are gone from later reads
        let remaining = store.dequeue_batch(10).unwrap();
        assert!(remaining.iter().all(|e| !ids.contains(&e.id)));
    }

    #[test]
    fn test_dequeue_is_oldest_first() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        for i in 0..10 {
            store.enqueue(&json!({"event": "e", "seq": i})).unwrap();
        }

        let batch = store.dequeue_batch(10).unwrap();
        let seqs: Vec<i64> = batch
            .iter()
            .map(|e| e.payload["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempdir().unwrap();
        {
            let store = open_store(dir.path());
            store.enqueue(&json!({"event": "kept"})).unwrap();
            store.set_distinct_id("user-1").unwrap();
        }

        let store = open_store(dir.path());
        assert_eq!(store.size().unwrap(), 1);
        assert_eq!(store.distinct_id().unwrap().as_deref(), Some("user-1"));
    }

    #[test]
    fn test_queue_capacity() {
        let dir = tempdir().unwrap();
        let store = EventStore::open(dir.path(), 2).unwrap();

        store.enqueue(&json!({"event": "a"})).unwrap();
        store.enqueue(&json!({"event": "b"})).unwrap();

        let result = store.enqueue(&json!({"event": "c"}));
        assert!(matches!(result, Err(SdkError::QueueFull)));
        assert_eq!(store.size().unwrap(), 2);
    }

    #[test]
    fn test_remove_unknown_id_is_noop() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.enqueue(&json!({"event": "a"})).unwrap();
        store.remove(&["not-a-real-id".to_string()]).unwrap();
        assert_eq!(store.size().unwrap(), 1);

        store.remove(&[]).unwrap();
    }

    #[test]
    fn test_settings_last_write_wins() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        assert_eq!(store.session_id().unwrap(), None);
        store.set_session_id("s1").unwrap();
        store.set_session_id("s2").unwrap();
        assert_eq!(store.session_id().unwrap().as_deref(), Some("s2"));

        assert!(!store.opt_out().unwrap());
        store.set_opt_out(true).unwrap();
        assert!(store.opt_out().unwrap());

        assert_eq!(store.feature_flags().unwrap(), "{}");
        store.set_feature_flags(r#"{"featureFlags":{"x":true}}"#).unwrap();
        assert!(store.feature_flags().unwrap().contains("featureFlags"));
    }

    #[test]
    fn test_super_properties() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());

        store.set_super_property("plan", &json!("pro")).unwrap();
        store.set_super_property("seats", &json!(5)).unwrap();

        let props = store.super_properties().unwrap();
        assert_eq!(props["plan"], json!("pro"));
        assert_eq!(props["seats"], json!(5));

        store.remove_super_property("plan").unwrap();
        let props = store.super_properties().unwrap();
        assert!(!props.contains_key("plan"));

        store.clear_super_properties().unwrap();
        assert!(store.super_properties().unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn prop_delivery_cycle_preserves_order_and_count(
            total in 1usize..40,
            batch in 1usize..20,
        ) {
            let dir = tempdir().unwrap();
            let store = open_store(dir.path());

            for i in 0..total {
                store.enqueue(&json!({"seq": i})).unwrap();
            }

            let before = store.size().unwrap();
            let events = store.dequeue_batch(batch).unwrap();
            let expected = batch.min(total);
            prop_assert_eq!(events.len(), expected);

            // Oldest first
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(event.payload["seq"].as_i64().unwrap(), i as i64);
            }

            let ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
            store.remove(&ids).unwrap();
            prop_assert_eq!(store.size().unwrap(), before - expected);

            // The next batch starts where the removed one ended
            let next = store.dequeue_batch(batch).unwrap();
            if let Some(first) = next.first() {
                prop_assert_eq!(first.payload["seq"].as_i64().unwrap(), expected as i64);
            }
        }
    }
}
