//! Error types for Tally
//!
//! Every failure is returned as a value; nothing here logs. Retry policy for
//! optimistic conflicts belongs to the transaction executor, which uses
//! [`TallyError::is_conflict`] to decide whether an attempt may be replayed.

use crate::types::DocKey;
use thiserror::Error;

/// Result type alias for Tally operations
pub type TallyResult<T> = std::result::Result<T, TallyError>;

/// Error taxonomy for sharded counting
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TallyError {
    /// Context was canceled or its deadline expired before a request was issued
    #[error("canceled: {reason}")]
    Canceled {
        /// Why the context is done
        reason: String,
    },

    /// Empty collection/id or an unusable shard count
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the bad setting
        message: String,
    },

    /// An argument to an operation is out of range
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the bad argument
        message: String,
    },

    /// RX/WX called on a transaction that is not active
    #[error("not in an active transaction (state: {state})")]
    NotInTransaction {
        /// Observed transaction state
        state: String,
    },

    /// WX called without a matching RX in the same transaction attempt
    #[error("missing read phase for '{owner}': {reason}")]
    MissingReadPhase {
        /// Logical id of the handle
        owner: String,
        /// Why the pending token was rejected
        reason: String,
    },

    /// A stored field could not be converted to the expected type
    #[error("type mismatch on field '{field}': expected {expected}, found {actual}")]
    TypeMismatch {
        /// Field name
        field: String,
        /// Expected type
        expected: String,
        /// Type actually stored
        actual: String,
    },

    /// A generated number does not fit the requested code width
    #[error("number {number} does not fit in a {width_bits}-bit code")]
    CapacityExceeded {
        /// Code width in bits
        width_bits: u32,
        /// Number that overflowed
        number: u64,
    },

    /// Optimistic validation failed at commit; the attempt may be retried
    #[error("transaction conflict: {reason}")]
    Conflict {
        /// Conflict description
        reason: String,
    },

    /// I/O failure from the backing store
    #[error("store error during {operation} on {collection}/{key} (owner '{owner}'): {message}")]
    Store {
        /// Operation being performed
        operation: String,
        /// Collection name
        collection: String,
        /// Logical id the document belongs to
        owner: String,
        /// Document key
        key: String,
        /// Underlying failure
        message: String,
    },
}

impl TallyError {
    /// Create a canceled error
    pub fn canceled(reason: impl Into<String>) -> Self {
        Self::Canceled {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a not-in-transaction error
    pub fn not_in_transaction(state: impl Into<String>) -> Self {
        Self::NotInTransaction {
            state: state.into(),
        }
    }

    /// Create a missing read phase error
    pub fn missing_read_phase(owner: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingReadPhase {
            owner: owner.into(),
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Create a store error with no operation context yet
    ///
    /// Context is attached by the caller through [`TallyError::with_store_context`].
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            operation: String::new(),
            collection: String::new(),
            owner: String::new(),
            key: String::new(),
            message: message.into(),
        }
    }

    /// Attach operation context to a store error
    ///
    /// Fields already filled in are kept. Other variants pass through untouched.
    pub fn with_store_context(self, operation: &str, owner: &str, key: &DocKey) -> Self {
        match self {
            Self::Store {
                operation: op,
                collection,
                owner: own,
                key: k,
                message,
            } => Self::Store {
                operation: if op.is_empty() { operation.to_string() } else { op },
                collection: if collection.is_empty() {
                    key.collection.clone()
                } else {
                    collection
                },
                owner: if own.is_empty() { owner.to_string() } else { own },
                key: if k.is_empty() { key.name.clone() } else { k },
                message,
            },
            other => other,
        }
    }

    /// Check if this is an optimistic conflict (retryable by the executor)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Check if the context was canceled
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. })
    }

    /// Check if this is a store I/O error
    pub fn is_store_error(&self) -> bool {
        matches!(self, Self::Store { .. })
    }

    /// Check if this error indicates misuse of the API rather than a runtime failure
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. }
                | Self::InvalidInput { .. }
                | Self::NotInTransaction { .. }
                | Self::MissingReadPhase { .. }
        )
    }
}
