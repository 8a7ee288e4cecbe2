//! Transaction validation for OCC
//!
//! First-committer-wins based on the READ set:
//! - every document read must still be at the version observed
//! - a document read as absent (version 0) must still be absent
//! - blind writes (write without read) do not conflict

use std::collections::HashMap;

use tally_core::DocKey;

use crate::table::DocumentTable;

/// Kinds of conflict detected at commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// A document read by the attempt changed before it committed
    ReadWriteConflict {
        /// The key that changed
        key: DocKey,
        /// Version recorded when read
        read_version: u64,
        /// Version at validation time
        current_version: u64,
    },
}

/// Result of transaction validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// All conflicts detected
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// A result with no conflicts
    pub fn ok() -> Self {
        Self::default()
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }
}

/// Validate the read set against the committed table
pub fn validate_read_set(read_set: &HashMap<DocKey, u64>, table: &DocumentTable) -> ValidationResult {
    let mut result = ValidationResult::ok();

    for (key, read_version) in read_set {
        let current_version = table.version_of(key);
        if current_version != *read_version {
            result.conflicts.push(ConflictType::ReadWriteConflict {
                key: key.clone(),
                read_version: *read_version,
                current_version,
            });
        }
    }

    result
}
