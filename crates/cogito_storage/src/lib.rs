//! Storage layer for cogito: the abstruse discrimination index and the term
//! storages built on it.
//!
//! The index retrieves exactly the stored terms *potentially* unifiable with
//! a query, including through variable positions on either side; storages
//! layer unification, canonical deduplication and (optionally) opaque-blob
//! persistence on top. Nothing here is async: the proof engine drives these
//! types from its own scheduler.

pub mod error;
pub mod index;
pub mod journal;
pub mod keys;
pub mod node;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use index::AbstruseIndex;
pub use journal::JournalNodeStore;
pub use keys::{
    make_key, make_token_key, project_key, universal_key, AbstruseKey, KeyElement, KeySlice,
};
pub use node::{MemoryNodeStore, NodeId, NodeStore};
pub use store::{
    IndexedTermStorage, SerializingStorage, TermStorage, Transaction, UnindexedStorage,
};
