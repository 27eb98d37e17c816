use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::ffi::ErrorCode;
use rusqlite::{Connection, Error as SqliteError, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};

/// Namespaced string store that outlives the process.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str) -> AppResult<Option<String>>;
    fn put(&self, namespace: &str, value: &str) -> AppResult<()>;
    fn remove(&self, namespace: &str) -> AppResult<()>;
}

pub struct SqliteStore {
    connection: Mutex<Connection>,
    path: Option<PathBuf>,
}

pub struct StoreBootstrap {
    pub store: SqliteStore,
    pub recovered: bool,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> AppResult<StoreBootstrap> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        match establish(path) {
            Ok(store) => {
                info!(
                    target: "store_bootstrap",
                    path = %path.display(),
                    "key-value store opened"
                );
                Ok(StoreBootstrap {
                    store,
                    recovered: false,
                })
            }
            Err(AppError::Database(err)) if should_attempt_recovery(&err, path) => {
                warn!(
                    target: "store_bootstrap",
                    path = %path.display(),
                    error = %err,
                    "key-value store is unreadable, recreating it"
                );
                recover_store(path)?;
                let store = establish(path)?;
                Ok(StoreBootstrap {
                    store,
                    recovered: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn in_memory() -> AppResult<Self> {
        let connection = Connection::open_in_memory()?;
        run_migrations(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, namespace: &str) -> AppResult<Option<String>> {
        let conn = self.connection.lock();
        conn.query_row(
            "SELECT value FROM kv_store WHERE namespace = ?1",
            [namespace],
            |row| row.get(0),
        )
        .optional()
        .map_err(AppError::from)
    }

    fn put(&self, namespace: &str, value: &str) -> AppResult<()> {
        let conn = self.connection.lock();
        conn.execute(
            "INSERT INTO kv_store (namespace, value, updated_at)
            VALUES (?1, ?2, DATETIME('now'))
            ON CONFLICT(namespace) DO UPDATE SET
                value = excluded.value,
                updated_at = DATETIME('now')",
            (namespace, value),
        )?;
        Ok(())
    }

    fn remove(&self, namespace: &str) -> AppResult<()> {
        let conn = self.connection.lock();
        conn.execute("DELETE FROM kv_store WHERE namespace = ?1", [namespace])?;
        Ok(())
    }
}

/// Volatile store for runs that must not touch disk.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str) -> AppResult<Option<String>> {
        Ok(self.entries.lock().get(namespace).cloned())
    }

    fn put(&self, namespace: &str, value: &str) -> AppResult<()> {
        self.entries
            .lock()
            .insert(namespace.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str) -> AppResult<()> {
        self.entries.lock().remove(namespace);
        Ok(())
    }
}

fn establish(path: &Path) -> AppResult<SqliteStore> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(path, flags)?;
    connection.pragma_update(None, "journal_mode", "WAL")?;
    run_migrations(&connection)?;
    Ok(SqliteStore {
        connection: Mutex::new(connection),
        path: Some(path.to_path_buf()),
    })
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS kv_store (
            namespace TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (DATETIME('now'))
        );
        "#,
    )?;
    Ok(())
}

fn should_attempt_recovery(err: &SqliteError, path: &Path) -> bool {
    if !path.exists() {
        return false;
    }

    match err {
        SqliteError::SqliteFailure(code, message) => {
            matches!(code.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
                || message
                    .as_deref()
                    .map(|msg| msg.contains("database disk image is malformed"))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

fn recover_store(path: &Path) -> AppResult<()> {
    remove_if_exists(path)?;
    remove_if_exists(&sibling(path, "-wal"))?;
    remove_if_exists(&sibling(path, "-shm"))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> AppResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Io(err)),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_table_and_round_trips_values() {
        let dir = tempdir().unwrap();
        let bootstrap = SqliteStore::open(dir.path().join("nested/store.db")).unwrap();
        assert!(!bootstrap.recovered);
        let store = bootstrap.store;
        assert!(store.path().unwrap().ends_with("nested/store.db"));

        assert_eq!(store.get("ns").unwrap(), None);
        store.put("ns", "{\"a\":1}").unwrap();
        store.put("ns", "{\"a\":2}").unwrap();
        assert_eq!(store.get("ns").unwrap().as_deref(), Some("{\"a\":2}"));
        store.remove("ns").unwrap();
        assert_eq!(store.get("ns").unwrap(), None);
    }

    #[test]
    fn keeps_values_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persist.db");
        {
            let store = SqliteStore::open(&path).unwrap().store;
            store.put("cache", "value").unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert!(!reopened.recovered);
        assert_eq!(reopened.store.get("cache").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn recovers_when_file_is_not_a_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xAB_u8; 4096]).unwrap();

        let bootstrap = SqliteStore::open(&path).unwrap();
        assert!(bootstrap.recovered);
        bootstrap.store.put("ns", "fresh").unwrap();
        assert_eq!(bootstrap.store.get("ns").unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn memory_store_isolates_namespaces() {
        let store = MemoryStore::default();
        store.put("a", "1").unwrap();
        store.put("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));
    }
}
