//! Transaction context for OCC
//!
//! One `TransactionContext` is one attempt of a transaction. It tracks the
//! version of every document read (the read set) and buffers writes until
//! commit. Nothing becomes visible to other attempts before commit.
//!
//! # Ordering rule
//!
//! All reads must precede all writes within an attempt. A read issued after
//! a buffered write fails, as it does in optimistic document stores where
//! read-after-write in the same attempt is disallowed.
//!
//! # Lifecycle
//!
//! `Active` → `Validating` → `Committed`, or `Active`/`Validating` → `Aborted`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tally_core::{DocKey, Document, FieldValue, TallyError, TallyResult, Transaction};

use crate::table::DocumentTable;

/// Status of a transaction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Executing, can read/write
    Active,
    /// Being validated for conflicts
    Validating,
    /// Committed successfully
    Committed,
    /// Aborted
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

/// A buffered write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite; with `merge`, only the given fields change
    Set {
        /// Fields to write
        fields: BTreeMap<String, FieldValue>,
        /// Merge into an existing document instead of replacing it
        merge: bool,
    },
    /// Atomic numeric increment
    Increment {
        /// Field to increment
        field: String,
        /// Amount to add
        delta: FieldValue,
    },
    /// Delete the document
    Delete,
}

/// One attempt of an optimistic transaction
pub struct TransactionContext {
    /// Unique transaction ID
    pub txn_id: u64,
    table: Arc<DocumentTable>,
    /// Keys read and the version observed (0 = absent)
    pub read_set: HashMap<DocKey, u64>,
    /// Buffered writes, applied in order at commit
    pub writes: Vec<(DocKey, WriteOp)>,
    /// Current status
    pub status: TransactionStatus,
}

impl TransactionContext {
    /// Create a new attempt reading from `table`
    pub fn new(txn_id: u64, table: Arc<DocumentTable>) -> Self {
        Self {
            txn_id,
            table,
            read_set: HashMap::new(),
            writes: Vec::new(),
            status: TransactionStatus::Active,
        }
    }

    /// Check if the attempt accepts operations
    pub fn is_active(&self) -> bool {
        matches!(self.status, TransactionStatus::Active)
    }

    /// Check if committed
    pub fn is_committed(&self) -> bool {
        matches!(self.status, TransactionStatus::Committed)
    }

    /// Check if aborted
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Fail with `NotInTransaction` unless active
    pub fn ensure_active(&self) -> TallyResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TallyError::not_in_transaction(format!(
                "transaction {} is {:?}",
                self.txn_id, self.status
            )))
        }
    }

    /// Version recorded for a key, if it was read
    pub fn read_version(&self, key: &DocKey) -> Option<u64> {
        self.read_set.get(key).copied()
    }

    /// `Active` → `Validating`
    pub fn mark_validating(&mut self) -> TallyResult<()> {
        self.ensure_active()?;
        self.status = TransactionStatus::Validating;
        Ok(())
    }

    /// `Validating` → `Committed`
    pub fn mark_committed(&mut self) -> TallyResult<()> {
        match &self.status {
            TransactionStatus::Validating => {
                self.status = TransactionStatus::Committed;
                Ok(())
            }
            other => Err(TallyError::not_in_transaction(format!(
                "cannot commit transaction {} from {:?}",
                self.txn_id, other
            ))),
        }
    }

    /// Abort and discard buffered writes
    ///
    /// The read set is kept for diagnostics.
    pub fn mark_aborted(&mut self, reason: impl Into<String>) -> TallyResult<()> {
        match &self.status {
            TransactionStatus::Committed | TransactionStatus::Aborted { .. } => {
                Err(TallyError::not_in_transaction(format!(
                    "cannot abort transaction {} from {:?}",
                    self.txn_id, self.status
                )))
            }
            _ => {
                self.status = TransactionStatus::Aborted {
                    reason: reason.into(),
                };
                self.writes.clear();
                Ok(())
            }
        }
    }

    fn buffer(&mut self, key: DocKey, op: WriteOp) -> TallyResult<()> {
        self.ensure_active()?;
        self.writes.push((key, op));
        Ok(())
    }
}

impl Transaction for TransactionContext {
    fn id(&self) -> u64 {
        self.txn_id
    }

    fn is_active(&self) -> bool {
        TransactionContext::is_active(self)
    }

    fn state(&self) -> String {
        format!("{:?}", self.status)
    }

    fn get(&mut self, key: &DocKey) -> TallyResult<Option<Document>> {
        self.ensure_active()?;
        if !self.writes.is_empty() {
            return Err(TallyError::store(
                "reads must be issued before any write in a transaction",
            ));
        }

        let stored = self.table.get(key);
        let version = stored.as_ref().map_or(0, |s| s.version);
        // First observation wins; a re-read must not mask a concurrent change
        self.read_set.entry(key.clone()).or_insert(version);
        Ok(stored.map(|s| s.doc))
    }

    fn set(
        &mut self,
        key: DocKey,
        fields: BTreeMap<String, FieldValue>,
        merge: bool,
    ) -> TallyResult<()> {
        self.buffer(key, WriteOp::Set { fields, merge })
    }

    fn increment(&mut self, key: DocKey, field: &str, delta: FieldValue) -> TallyResult<()> {
        if !delta.is_numeric() {
            return Err(TallyError::type_mismatch(field, "number", delta.type_name()));
        }
        self.buffer(
            key,
            WriteOp::Increment {
                field: field.to_string(),
                delta,
            },
        )
    }

    fn delete(&mut self, key: DocKey) -> TallyResult<()> {
        self.buffer(key, WriteOp::Delete)
    }
}
