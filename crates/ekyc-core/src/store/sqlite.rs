//! SQLite-backed user store.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{Store, StoreError, UserRecord};

/// Users table schema.
///
/// The unique index over `(identity_number, name)` is what resolves two
/// concurrent inserts of the same pair to exactly one winner.
const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS users (
        type TEXT NOT NULL,
        identity_number TEXT NOT NULL,
        name TEXT NOT NULL,
        date_of_issue TEXT NOT NULL,
        date_of_expiry TEXT NOT NULL,
        address TEXT NOT NULL,
        UNIQUE (identity_number, name)
    );
";

/// User store over a single SQLite connection.
///
/// The connection lives behind a mutex and is shared by every worker;
/// statements are short enough that contention stays behind the store
/// round-trip itself.
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the store at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the file cannot be opened or
    /// the schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store, used by tests and local runs.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the connection cannot be
    /// created.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::Connection(format!("schema init failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Runs `f` against the live connection, failing once closed.
    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, StoreError> {
        let guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(format!("mutex poisoned: {e}")))?;
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn).map_err(|e| StoreError::Query(e.to_string()))
    }
}

impl Store for SqliteStore {
    fn exists_user(&self, id: &str, name: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT 1 FROM users WHERE identity_number = ?1 AND name = ?2",
                params![id, name],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
        })
    }

    fn insert_user(&self, user: &UserRecord) -> Result<bool, StoreError> {
        let inserted = self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users
                 (type, identity_number, name, date_of_issue, date_of_expiry, address)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.doc_type,
                    user.id,
                    user.name,
                    user.date_of_issue,
                    user.date_of_expiry,
                    user.address,
                ],
            )
        })? == 1;

        debug!(
            id = %user.id,
            name = %user.name,
            inserted,
            "insert_user"
        );
        Ok(inserted)
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|e| StoreError::Query(format!("mutex poisoned: {e}")))?;
        if let Some(conn) = guard.take() {
            conn.close()
                .map_err(|(_, e)| StoreError::Query(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn alice() -> UserRecord {
        UserRecord {
            doc_type: "passport".to_string(),
            id: "A1".to_string(),
            name: "Alice".to_string(),
            date_of_issue: "2020-01-01".to_string(),
            date_of_expiry: "2030-01-01".to_string(),
            address: "1 First Street".to_string(),
        }
    }

    #[test]
    fn test_exists_on_empty_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(!store.exists_user("A1", "Alice").unwrap());
    }

    #[test]
    fn test_insert_then_exists() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_user(&alice()).unwrap());
        assert!(store.exists_user("A1", "Alice").unwrap());
        // Same id, different name is a different pair.
        assert!(!store.exists_user("A1", "Bob").unwrap());
    }

    #[test]
    fn test_duplicate_insert_returns_false() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.insert_user(&alice()).unwrap());
        assert!(!store.insert_user(&alice()).unwrap());
    }

    #[test]
    fn test_closed_store_refuses_calls() {
        let store = SqliteStore::in_memory().unwrap();
        store.close().unwrap();
        assert!(matches!(
            store.exists_user("A1", "Alice"),
            Err(StoreError::Closed)
        ));
        assert!(matches!(
            store.insert_user(&alice()),
            Err(StoreError::Closed)
        ));
        // Closing twice is harmless.
        store.close().unwrap();
    }

    #[test]
    fn test_concurrent_duplicate_insert_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());

        let successes: usize = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || usize::from(store.insert_user(&alice()).unwrap()))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .sum();

        assert_eq!(successes, 1, "exactly one insert must win");
        assert!(store.exists_user("A1", "Alice").unwrap());
    }
}
