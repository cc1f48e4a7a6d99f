//! Core primitive types for the strata chunk store.
//!
//! This crate is kept separate so the index backends and the block store can
//! share the chunk identity types without depending on each other.
//!
//! # Types
//!
//! - [`ContentHash`] - Fixed-length chunk identifier (32 bytes)
//! - [`ChunkKind`] - Raw data or structured meta-data
//!
//! A chunk's identity is the pair `(ContentHash, ChunkKind)`. The all-zero
//! hash ([`ContentHash::ZERO`]) is reserved and never names a real chunk.

mod hash;
mod kind;

pub use hash::{ContentHash, HASH_LENGTH, HashError};
pub use kind::ChunkKind;
