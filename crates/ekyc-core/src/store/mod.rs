//! User store the business step runs against.
//!
//! Workers touch the store only through the [`Store`] trait; the shipped
//! implementation is [`sqlite::SqliteStore`]. The contract is intentionally
//! narrow: existence check, guarded insert, close.

mod sqlite;

pub use sqlite::SqliteStore;
use thiserror::Error;

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The backing connection could not be opened.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A query failed at runtime.
    #[error("store query failed: {0}")]
    Query(String),

    /// The store was closed and can serve no further calls.
    #[error("store is closed")]
    Closed,
}

/// One user row, keyed by `(id, name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Document type, e.g. `"passport"`.
    pub doc_type: String,
    /// Identity number.
    pub id: String,
    /// Full name.
    pub name: String,
    /// Document issue date.
    pub date_of_issue: String,
    /// Document expiry date.
    pub date_of_expiry: String,
    /// Free-text address.
    pub address: String,
}

/// Relational store operations the workers invoke.
///
/// Implementations must be safe for concurrent calls from every worker
/// thread.
pub trait Store: Send + Sync {
    /// Returns whether the `(id, name)` pair is present.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store is closed or the query
    /// fails; callers treat any error as "not present".
    fn exists_user(&self, id: &str, name: &str) -> Result<bool, StoreError>;

    /// Inserts a user unless the `(id, name)` pair already exists.
    ///
    /// Returns `Ok(true)` iff a new row was created; a unique-constraint
    /// collision with a concurrent insert resolves to `Ok(false)` for all
    /// but one caller.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] when the store is closed or the statement
    /// fails.
    fn insert_user(&self, user: &UserRecord) -> Result<bool, StoreError>;

    /// Releases the backing connection; later calls return
    /// [`StoreError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the connection refuses to close.
    fn close(&self) -> Result<(), StoreError>;
}
