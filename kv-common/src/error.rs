//! Internal error vocabulary shared by `kv-core` and `kv-server`.
//!
//! This is distinct from [`crate::protocol::ReplyError`]: `StoreError` is
//! never put on the wire directly, it is the failure mode of internal
//! operations (growing a table, allocating a node) that a caller then maps
//! onto a `ReplyError` for the client.

use thiserror::Error;

/// Failure modes internal to the keyspace and its supporting structures.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// A table or arena could not grow to hold a new entry.
    #[error("allocation failure")]
    OutOfMemory,
    /// The requested entry does not exist.
    #[error("key not found")]
    NotFound,
    /// The entry exists but holds the wrong payload type for this op.
    #[error("wrong type for operation")]
    WrongType,
}

pub type StoreResult<T> = Result<T, StoreError>;
