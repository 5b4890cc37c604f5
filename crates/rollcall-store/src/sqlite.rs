//! Key-value table in SQLite, one row per storage key.

use rollcall_core::{Storage, StorageError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("creating database directory: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (or create) the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        tracing::info!(path = %path.display(), "opened attendance database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<(), DbError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn backend(e: rusqlite::Error) -> StorageError {
    StorageError::Backend(Box::new(e))
}

impl Storage for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(backend)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn()
            .execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::storage::{FACES_KEY, LOG_KEY};
    use rollcall_core::{
        AttendanceLedger, Embedding, EmbeddingStore, FaceProfile, Identity, ManualClock,
    };
    use std::sync::Arc;

    #[test]
    fn test_get_missing_is_none() {
        let db = SqliteStorage::open_in_memory().unwrap();
        assert_eq!(db.get("nope").unwrap(), None);
    }

    #[test]
    fn test_set_overwrites() {
        let db = SqliteStorage::open_in_memory().unwrap();
        db.set("k", "one").unwrap();
        db.set("k", "two").unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let path = std::env::temp_dir()
            .join(format!("rollcall-test-{}", uuid::Uuid::new_v4()))
            .join("attendance.db");
        {
            let db = SqliteStorage::open(&path).unwrap();
            db.set("k", "[1,2,3]").unwrap();
        }
        let db = SqliteStorage::open(&path).unwrap();
        assert_eq!(db.get("k").unwrap().as_deref(), Some("[1,2,3]"));
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_stores_round_trip_through_sqlite() {
        let db = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));

        let mut store = EmbeddingStore::load(db.clone(), 0.5).unwrap();
        store
            .add(FaceProfile {
                name: "Ann".into(),
                id: Some("1".into()),
                embedding: Embedding::new(vec![0.125, -0.5, 0.1]),
                registered_at: "2026-03-02T08:00:00.000Z".into(),
                quality: 0.9,
            })
            .unwrap();
        let mut ledger = AttendanceLedger::load(db.clone(), clock.clone()).unwrap();
        ledger
            .mark(&Identity {
                name: "Ann".into(),
                id: Some("1".into()),
                confidence: 0.75,
            })
            .unwrap();

        let faces = db.get(FACES_KEY).unwrap().unwrap();
        let log = db.get(LOG_KEY).unwrap().unwrap();
        assert!(faces.contains("[0.125,-0.5,0.1]"));

        let reloaded_store = EmbeddingStore::load(db.clone(), 0.5).unwrap();
        let reloaded_ledger = AttendanceLedger::load(db.clone(), clock).unwrap();
        assert_eq!(reloaded_store.list(), store.list());
        assert_eq!(reloaded_ledger.log(), ledger.log());

        rollcall_core::storage::save_json(db.as_ref(), FACES_KEY, reloaded_store.list()).unwrap();
        rollcall_core::storage::save_json(db.as_ref(), LOG_KEY, reloaded_ledger.log()).unwrap();
        assert_eq!(db.get(FACES_KEY).unwrap().unwrap(), faces);
        assert_eq!(db.get(LOG_KEY).unwrap().unwrap(), log);
    }
}
