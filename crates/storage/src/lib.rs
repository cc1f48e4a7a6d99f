//! Durable hash index abstraction.
//!
//! The block store keeps one paged, append-ordered index of known hashes per
//! [`ChunkKind`](strata_primitives::ChunkKind). Backends implement
//! [`HashIndex`]; keys are laid out with the [`Encode`] codec in [`keys`] so
//! every backend orders entries the same way.

use std::fmt::Debug;

mod index;
pub mod keys;
mod memory;

pub use index::HashIndex;
pub use memory::MemoryHashIndex;

/// Trait that will transform the data to be saved in the DB.
pub trait Encode: Send + Sync + Sized + Debug {
    /// Encoded type.
    type Encoded: AsRef<[u8]> + Into<Vec<u8>> + Send + Sync + Ord + Debug;

    /// Encodes data going into the database.
    fn encode(self) -> Self::Encoded;
}

/// Database error type.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DatabaseError {
    /// Failed to open the database.
    #[error("failed to open the database: {0}")]
    Open(String),
    /// Failed to initiate a transaction.
    #[error("failed to initialize a transaction: {0}")]
    InitTx(String),
    /// Failed to open a table.
    #[error("failed to open a table: {0}")]
    Table(String),
    /// Failed to read a value from a table.
    #[error("failed to read a value from a database table: {0}")]
    Read(String),
    /// Failed to write or delete a value.
    #[error("failed to write a value into a database table: {0}")]
    Write(String),
    /// Failed to commit transaction changes into the database.
    #[error("failed to commit transaction changes: {0}")]
    Commit(String),
}

/// Result type for index operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
