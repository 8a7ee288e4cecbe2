//! In-memory optimistic document store
//!
//! `MemoryStore` implements [`DocumentStore`] over a [`DocumentTable`]. It is
//! the store the counting primitives are tested against, and the reference
//! for how an adapter to a networked store must behave:
//!
//! - `begin_transaction` replays the closure on optimistic conflict with
//!   capped exponential backoff, up to `RetryConfig::max_retries`
//! - a closure error aborts the attempt and is returned without retry
//! - the context is checked before every attempt and every non-transactional
//!   request
//! - after `close`, every request fails with a store error
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::open(&TallyConfig::default());
//! store.begin_transaction(&Context::background(), |tx| {
//!     tx.increment(DocKey::new("c", "k"), "Value", FieldValue::Int(1))
//! })?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tally_core::{
    Context, DocKey, Document, DocumentStore, FieldValue, RetryConfig, TallyConfig, TallyError,
    TallyResult,
};
use tracing::debug;

use crate::manager::{CommitError, TransactionManager};
use crate::table::DocumentTable;
use crate::transaction::TransactionContext;

/// Transaction counters
///
/// Relaxed ordering: these are statistics, not synchronization.
#[derive(Debug, Default)]
struct Stats {
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    retried: AtomicU64,
}

/// Snapshot of transaction counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Attempts started
    pub started: u64,
    /// Attempts committed
    pub committed: u64,
    /// Attempts aborted (closure error or conflict)
    pub aborted: u64,
    /// Attempts replayed after a conflict
    pub retried: u64,
}

/// In-memory transactional document store
pub struct MemoryStore {
    table: Arc<DocumentTable>,
    manager: TransactionManager,
    retry: RetryConfig,
    open: AtomicBool,
    stats: Stats,
}

impl MemoryStore {
    /// Open a store with the retry policy from `config`
    pub fn open(config: &TallyConfig) -> Self {
        Self::new(config.retry.clone())
    }

    /// Open a store with an explicit retry policy
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            table: Arc::new(DocumentTable::new()),
            manager: TransactionManager::default(),
            retry,
            open: AtomicBool::new(true),
            stats: Stats::default(),
        }
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Retry policy in use
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Stop accepting requests
    ///
    /// Idempotent. Committed documents stay readable through `table`.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(target: "tally::txn", "Store closed");
        }
    }

    /// Whether the store accepts requests
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Committed state
    pub fn table(&self) -> &DocumentTable {
        &self.table
    }

    /// Number of committed documents
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no documents are stored
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Write a document directly, bypassing transactions
    ///
    /// Used to seed fixtures. Takes a fresh commit version so concurrent
    /// readers of the key conflict as they would with a transactional write.
    pub fn insert_document(&self, key: DocKey, doc: Document) -> TallyResult<()> {
        self.ensure_open()?;
        let version = self.manager.allocate_version();
        self.table.put(key, doc, version);
        Ok(())
    }

    /// Begin a single attempt for manual control
    ///
    /// Prefer `begin_transaction`, which commits and retries for you.
    pub fn begin(&self) -> TallyResult<TransactionContext> {
        self.ensure_open()?;
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        Ok(TransactionContext::new(
            self.manager.next_txn_id(),
            Arc::clone(&self.table),
        ))
    }

    /// Commit an attempt started with `begin`
    pub fn commit(&self, txn: &mut TransactionContext) -> TallyResult<u64> {
        self.ensure_open()?;
        match self.manager.commit(txn, &self.table) {
            Ok(version) => {
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                Ok(version)
            }
            Err(e) => {
                if !matches!(e, CommitError::InvalidState(_)) {
                    self.stats.aborted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e.into())
            }
        }
    }

    /// Abort an attempt started with `begin`
    pub fn abort(&self, txn: &mut TransactionContext, reason: impl Into<String>) -> TallyResult<()> {
        self.manager.abort(txn, reason)?;
        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Snapshot of transaction counters
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            started: self.stats.started.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            aborted: self.stats.aborted.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
        }
    }

    fn ensure_open(&self) -> TallyResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(TallyError::store("store is closed"))
        }
    }
}

impl DocumentStore for MemoryStore {
    type Txn = TransactionContext;

    fn begin_transaction<T, F>(&self, ctx: &Context, mut f: F) -> TallyResult<T>
    where
        F: FnMut(&mut Self::Txn) -> TallyResult<T>,
    {
        let mut attempt = 0;
        loop {
            ctx.check()?;
            let mut txn = self.begin()?;

            let value = match f(&mut txn) {
                Ok(value) => value,
                Err(e) => {
                    if txn.is_active() {
                        let _ = self.abort(&mut txn, e.to_string());
                    }
                    debug!(target: "tally::txn", txn_id = txn.txn_id, error = %e, "Aborted by closure");
                    return Err(e);
                }
            };

            match self.commit(&mut txn) {
                Ok(_) => return Ok(value),
                Err(e) if e.is_conflict() && attempt < self.retry.max_retries => {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: "tally::txn",
                        txn_id = txn.txn_id,
                        attempt,
                        "Conflict, retrying"
                    );
                    std::thread::sleep(self.retry.delay_for(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get(&self, ctx: &Context, key: &DocKey) -> TallyResult<Option<Document>> {
        ctx.check()?;
        self.ensure_open()?;
        Ok(self.table.get(key).map(|stored| stored.doc))
    }

    fn query_eq(
        &self,
        ctx: &Context,
        collection: &str,
        field: &str,
        value: &FieldValue,
    ) -> TallyResult<Vec<(DocKey, Document)>> {
        ctx.check()?;
        self.ensure_open()?;
        Ok(self.table.scan_eq(collection, field, value))
    }

    fn delete(&self, ctx: &Context, key: &DocKey) -> TallyResult<()> {
        ctx.check()?;
        self.ensure_open()?;
        if self.table.remove(key).is_some() {
            self.manager.allocate_version();
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
