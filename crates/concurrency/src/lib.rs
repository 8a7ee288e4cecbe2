//! Concurrency layer for Tally
//!
//! An in-memory document store with optimistic concurrency control,
//! implementing the `DocumentStore` surface the counting primitives consume:
//! - TransactionContext: per-attempt read-set and buffered writes
//! - Validation: first-committer-wins on the read set
//! - TransactionManager: commit lock, global version, atomic apply
//! - MemoryStore: retrying executor, queries, open/close lifecycle
//!
//! It serves as the injectable store for tests and as the reference
//! semantics for adapters to networked stores.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod store;
pub mod table;
pub mod transaction;
pub mod validation;

pub use manager::{CommitError, TransactionManager};
pub use store::{MemoryStore, StoreStats};
pub use table::{DocumentTable, StoredDocument};
pub use transaction::{TransactionContext, TransactionStatus, WriteOp};
pub use validation::{validate_read_set, ConflictType, ValidationResult};
