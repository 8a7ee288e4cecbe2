//! Transaction manager for coordinating commit operations
//!
//! Commit is all-or-nothing:
//!
//! ```text
//! 1. take the commit lock
//! 2. Active → Validating
//! 3. validate the read set; on conflict → Aborted, return ValidationFailed
//! 4. stage every buffered write against the committed state
//! 5. allocate one commit version for the whole transaction
//! 6. install all staged documents, → Committed
//! ```
//!
//! Staging completes before anything is installed, so a write that cannot be
//! applied leaves the table untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tally_core::{DocKey, Document, TallyError, TallyResult};
use thiserror::Error;
use tracing::debug;

use crate::table::DocumentTable;
use crate::transaction::{TransactionContext, WriteOp};
use crate::validation::{validate_read_set, ConflictType, ValidationResult};

/// Errors from the commit protocol
#[derive(Debug, Clone, Error)]
pub enum CommitError {
    /// Read set no longer matches the committed state
    #[error("commit failed: {} conflict(s)", .0.conflict_count())]
    ValidationFailed(ValidationResult),

    /// Transaction was not in a committable state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A buffered write could not be applied
    #[error("apply failed: {0}")]
    Apply(TallyError),
}

impl CommitError {
    /// Check if the failure is an optimistic conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitError::ValidationFailed(_))
    }
}

impl From<CommitError> for TallyError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => {
                let reason = match result.conflicts.first() {
                    Some(ConflictType::ReadWriteConflict {
                        key,
                        read_version,
                        current_version,
                    }) => format!(
                        "{} changed from version {} to {} ({} conflict(s))",
                        key,
                        read_version,
                        current_version,
                        result.conflict_count()
                    ),
                    None => "read set changed".to_string(),
                };
                TallyError::conflict(reason)
            }
            CommitError::InvalidState(state) => TallyError::not_in_transaction(state),
            CommitError::Apply(inner) => inner,
        }
    }
}

/// Manages transaction ids, the global version and atomic commits
pub struct TransactionManager {
    /// Global version counter
    ///
    /// Monotonically increasing. Each committed transaction increments by 1.
    version: AtomicU64,

    /// Next transaction ID
    next_txn_id: AtomicU64,

    /// Serializes validate-and-apply
    commit_lock: Mutex<()>,
}

impl TransactionManager {
    /// Create a new transaction manager starting at `initial_version`
    pub fn new(initial_version: u64) -> Self {
        TransactionManager {
            version: AtomicU64::new(initial_version),
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
        }
    }

    /// Get current global version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Allocate next transaction ID
    pub fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Allocate next commit version (increment global version)
    pub fn allocate_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Commit a transaction atomically
    ///
    /// Returns the commit version. A transaction with no writes still
    /// validates its reads but does not consume a version.
    pub fn commit(
        &self,
        txn: &mut TransactionContext,
        table: &DocumentTable,
    ) -> Result<u64, CommitError> {
        let _guard = self.commit_lock.lock();

        txn.mark_validating()
            .map_err(|e| CommitError::InvalidState(e.to_string()))?;

        let result = validate_read_set(&txn.read_set, table);
        if !result.is_valid() {
            debug!(
                target: "tally::txn",
                txn_id = txn.txn_id,
                conflicts = result.conflict_count(),
                "Validation failed"
            );
            let _ = txn.mark_aborted(format!("{} conflict(s)", result.conflict_count()));
            return Err(CommitError::ValidationFailed(result));
        }

        let staged = match stage_writes(&txn.writes, table) {
            Ok(staged) => staged,
            Err(e) => {
                let _ = txn.mark_aborted(e.to_string());
                return Err(CommitError::Apply(e));
            }
        };

        let commit_version = if staged.is_empty() {
            self.current_version()
        } else {
            self.allocate_version()
        };
        for (key, doc) in staged {
            match doc {
                Some(doc) => table.put(key, doc, commit_version),
                None => {
                    table.remove(&key);
                }
            }
        }

        txn.mark_committed()
            .map_err(|e| CommitError::InvalidState(e.to_string()))?;
        debug!(
            target: "tally::txn",
            txn_id = txn.txn_id,
            commit_version,
            writes = txn.writes.len(),
            "Committed"
        );
        Ok(commit_version)
    }

    /// Explicitly abort a transaction, discarding buffered writes
    pub fn abort(&self, txn: &mut TransactionContext, reason: impl Into<String>) -> TallyResult<()> {
        txn.mark_aborted(reason)
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Resolve buffered writes into final document states (`None` = deleted)
fn stage_writes(
    writes: &[(DocKey, WriteOp)],
    table: &DocumentTable,
) -> TallyResult<HashMap<DocKey, Option<Document>>> {
    let mut staged: HashMap<DocKey, Option<Document>> = HashMap::new();

    for (key, op) in writes {
        let current = match staged.get(key) {
            Some(doc) => doc.clone(),
            None => table.get(key).map(|stored| stored.doc),
        };

        let next = match op {
            WriteOp::Set { fields, merge } => match (current, *merge) {
                (Some(mut existing), true) => {
                    existing.merge(fields.clone());
                    Some(existing)
                }
                _ => Some(Document::from_fields(fields.clone())),
            },
            WriteOp::Increment { field, delta } => {
                let mut doc = current.unwrap_or_default();
                let value = match doc.get(field) {
                    Some(existing) if existing.is_numeric() => existing.checked_add(delta, field)?,
                    // Missing or non-numeric fields are replaced by the delta
                    _ => delta.clone(),
                };
                doc.set(field.clone(), value);
                Some(doc)
            }
            WriteOp::Delete => None,
        };
        staged.insert(key.clone(), next);
    }

    Ok(staged)
}
