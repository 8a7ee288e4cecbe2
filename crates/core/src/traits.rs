//! Document store abstraction
//!
//! The counting primitives consume exactly this surface from the backing
//! store. Any store offering an optimistic multi-document transaction with
//! retry plus an atomic numeric increment can implement it.
//!
//! ## Transaction contract
//!
//! `begin_transaction` runs the closure, commits on `Ok`, and discards every
//! buffered write on `Err`. On an optimistic conflict it replays the closure
//! in a fresh attempt; attempts never overlap. Within one attempt all reads
//! must be issued before any write.

use std::collections::BTreeMap;

use crate::context::Context;
use crate::document::Document;
use crate::error::TallyResult;
use crate::types::DocKey;
use crate::value::FieldValue;

/// One attempt of a document-store transaction
pub trait Transaction {
    /// Identifier of this attempt, unique per store
    fn id(&self) -> u64;

    /// Whether reads and writes are still accepted
    fn is_active(&self) -> bool;

    /// Human-readable state, used in `NotInTransaction` errors
    fn state(&self) -> String;

    /// Read a document; `None` if it does not exist
    fn get(&mut self, key: &DocKey) -> TallyResult<Option<Document>>;

    /// Create or overwrite a document; with `merge` only the given fields change
    fn set(
        &mut self,
        key: DocKey,
        fields: BTreeMap<String, FieldValue>,
        merge: bool,
    ) -> TallyResult<()>;

    /// Atomically add `delta` to a numeric field
    fn increment(&mut self, key: DocKey, field: &str, delta: FieldValue) -> TallyResult<()>;

    /// Delete a document
    fn delete(&mut self, key: DocKey) -> TallyResult<()>;
}

/// Transactional document store
///
/// Thread safety: all methods must be callable concurrently (Send + Sync).
pub trait DocumentStore: Send + Sync {
    /// Transaction attempt type handed to closures
    type Txn: Transaction;

    /// Run `f` in a transaction, retrying on optimistic conflict
    ///
    /// The closure may run more than once; it must not rely on side effects
    /// from a previous attempt.
    fn begin_transaction<T, F>(&self, ctx: &Context, f: F) -> TallyResult<T>
    where
        F: FnMut(&mut Self::Txn) -> TallyResult<T>;

    /// Read a document outside any transaction
    fn get(&self, ctx: &Context, key: &DocKey) -> TallyResult<Option<Document>>;

    /// All documents of `collection` whose `field` equals `value`, ordered by key
    fn query_eq(
        &self,
        ctx: &Context,
        collection: &str,
        field: &str,
        value: &FieldValue,
    ) -> TallyResult<Vec<(DocKey, Document)>>;

    /// Delete a document outside any transaction
    fn delete(&self, ctx: &Context, key: &DocKey) -> TallyResult<()>;
}
