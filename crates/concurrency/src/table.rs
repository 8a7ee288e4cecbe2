//! Versioned document table
//!
//! DashMap keyed by `DocKey`: lock-free reads, writes lock only the target
//! shard. Every committed document carries the global version of the
//! transaction that last wrote it. An absent document reads as version 0.

use dashmap::DashMap;
use tally_core::{DocKey, Document, FieldValue};

/// A committed document and the version that wrote it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Commit version of the last write
    pub version: u64,
    /// Document contents
    pub doc: Document,
}

/// Committed state of the store
#[derive(Debug, Default)]
pub struct DocumentTable {
    docs: DashMap<DocKey, StoredDocument>,
}

impl DocumentTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Current committed document
    pub fn get(&self, key: &DocKey) -> Option<StoredDocument> {
        self.docs.get(key).map(|entry| entry.value().clone())
    }

    /// Current version of a key, 0 if absent
    pub fn version_of(&self, key: &DocKey) -> u64 {
        self.docs.get(key).map_or(0, |entry| entry.version)
    }

    /// Install a document at `version`
    pub fn put(&self, key: DocKey, doc: Document, version: u64) {
        self.docs.insert(key, StoredDocument { version, doc });
    }

    /// Remove a document
    pub fn remove(&self, key: &DocKey) -> Option<StoredDocument> {
        self.docs.remove(key).map(|(_, stored)| stored)
    }

    /// Documents of `collection` whose `field` equals `value`, sorted by key
    pub fn scan_eq(
        &self,
        collection: &str,
        field: &str,
        value: &FieldValue,
    ) -> Vec<(DocKey, Document)> {
        let mut results: Vec<(DocKey, Document)> = self
            .docs
            .iter()
            .filter(|entry| {
                entry.key().collection == collection && entry.doc.get(field) == Some(value)
            })
            .map(|entry| (entry.key().clone(), entry.doc.clone()))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}
