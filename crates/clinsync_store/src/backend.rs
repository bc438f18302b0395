//! State store trait definition.

use crate::error::StoreResult;

/// A keyed byte store for sync engine state.
///
/// State stores are **opaque byte stores**. The engine serializes its
/// queue and dead-letter list itself; stores do not understand
/// operations, entities, or any record format.
///
/// # Invariants
///
/// - `put` is durable before returning: after a successful call, a
///   process restart followed by `get` returns exactly the stored bytes
/// - `get` of a never-written key returns `None`
/// - a store is a single-writer-at-a-time resource; implementations
///   guard against concurrent writers from other processes
/// - stores must be `Send + Sync` for shared access
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - For testing
/// - [`crate::FileStore`] - For persistent state
pub trait StateStore: Send + Sync {
    /// Reads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// After this returns successfully, the value is guaranteed to
    /// survive process termination.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or an I/O error occurs.
    fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Removes the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&self, key: &str) -> StoreResult<()>;
}
