//! Local Store Adapter.
//!
//! # Responsibility
//! - Provide synchronous key-value persistence that never touches the network.
//! - Load and save the serialized `RotationState` under one fixed key.
//!
//! # Invariants
//! - A malformed or unreadable payload loads as absent, never as an error.
//! - `set` replaces the whole value for a key.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::rotation::RotationState;
use log::{debug, error, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub type LocalResult<T> = Result<T, LocalStoreError>;

/// Local persistence failure. Always non-fatal for callers.
#[derive(Debug)]
pub enum LocalStoreError {
    Db(DbError),
    Encode(serde_json::Error),
}

impl Display for LocalStoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "local store failed: {err}"),
            Self::Encode(err) => write!(f, "failed to encode rotation state: {err}"),
        }
    }
}

impl Error for LocalStoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
        }
    }
}

impl From<DbError> for LocalStoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LocalStoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Durable string key-value contract.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> LocalResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> LocalResult<()>;
}

/// SQLite-backed key-value store over the `kv_entries` table.
pub struct SqliteKvStore {
    conn: Connection,
}

impl SqliteKvStore {
    /// Opens or creates the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> LocalResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    /// Opens a throwaway in-memory database.
    pub fn open_in_memory() -> LocalResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    /// Wraps a connection that already went through `db::open_db*`.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl KeyValueStore for SqliteKvStore {
    fn get(&self, key: &str) -> LocalResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> LocalResult<()> {
        self.conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at)
             VALUES (?1, ?2, (strftime('%s', 'now') * 1000))
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Process-local key-value store for hosts without a disk.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> LocalResult<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> LocalResult<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Typed rotation-state view over a key-value store.
pub struct LocalStateStore<S: KeyValueStore> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> LocalStateStore<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Loads the persisted state.
    ///
    /// Read failures and malformed payloads are logged and reported as
    /// `None` so startup falls back to an empty rotation.
    pub fn load(&self) -> Option<RotationState> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("event=local_load module=store status=skipped reason=absent");
                return None;
            }
            Err(err) => {
                error!(
                    "event=local_load module=store status=error error_code=read_failed error={err}"
                );
                return None;
            }
        };

        match RotationState::from_json_str(&raw) {
            Ok(state) => {
                debug!(
                    "event=local_load module=store status=ok people={} history={}",
                    state.people().len(),
                    state.history().len()
                );
                Some(state)
            }
            Err(err) => {
                warn!(
                    "event=local_load module=store status=error error_code=decode_failed bytes={} error={err}",
                    raw.len()
                );
                None
            }
        }
    }

    /// Persists the full state under the configured key.
    pub fn save(&self, state: &RotationState) -> LocalResult<()> {
        let payload = state.to_json_string().map_err(LocalStoreError::Encode)?;
        self.store.set(&self.key, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyValueStore, LocalStateStore, MemoryKvStore, SqliteKvStore};
    use crate::model::rotation::RotationState;

    #[test]
    fn sqlite_set_overwrites_existing_value() {
        let store = SqliteKvStore::open_in_memory().expect("open store");
        store.set("k", "first").expect("first set");
        store.set("k", "second").expect("second set");

        assert_eq!(store.get("k").expect("get"), Some("second".to_string()));
        assert_eq!(store.get("missing").expect("get missing"), None);
    }

    #[test]
    fn corrupt_payload_loads_as_absent() {
        let kv = MemoryKvStore::new();
        kv.set("rotation_state", "{broken").expect("seed corrupt payload");

        let local = LocalStateStore::new(kv, "rotation_state");
        assert!(local.load().is_none());
    }

    #[test]
    fn save_then_load_returns_equal_state() {
        let local = LocalStateStore::new(MemoryKvStore::new(), "rotation_state");
        let mut state = RotationState::new();
        state.add_person("Anna").expect("add Anna");
        state.add_person("Ben").expect("add Ben");
        state.mark_done();

        local.save(&state).expect("save");
        assert_eq!(local.load(), Some(state));
    }
}
