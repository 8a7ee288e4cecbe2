//! Shard document schema
//!
//! The stored layout owned by this crate. Field names are stable:
//!
//! | Field     | Type      | Present on            |
//! |-----------|-----------|-----------------------|
//! | `OwnerID` | string    | every shard           |
//! | `Value`   | numeric   | every shard           |
//! | `Level`   | string    | counter shards        |
//! | `Time`    | timestamp | counter shards        |
//!
//! `Value` only grows: it is set once at creation and afterwards changed
//! through atomic increments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{TallyError, TallyResult};
use crate::types::Level;
use crate::value::FieldValue;

/// Owner field name
pub const FIELD_OWNER_ID: &str = "OwnerID";
/// Value field name
pub const FIELD_VALUE: &str = "Value";
/// Level field name
pub const FIELD_LEVEL: &str = "Level";
/// Time field name
pub const FIELD_TIME: &str = "Time";

/// A stored document: named fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, FieldValue>,
}

impl Document {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document from fields
    pub fn from_fields(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    /// Get a field, failing if absent
    pub fn field(&self, name: &str) -> TallyResult<&FieldValue> {
        self.fields
            .get(name)
            .ok_or_else(|| TallyError::type_mismatch(name, "present field", "missing"))
    }

    /// Get a field if present
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Set a field
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.insert(name.into(), value);
    }

    /// Merge fields into this document, overwriting same-named fields
    pub fn merge(&mut self, fields: BTreeMap<String, FieldValue>) {
        self.fields.extend(fields);
    }

    /// All fields
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the document has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Typed view of a shard document
#[derive(Debug, Clone, PartialEq)]
pub struct ShardDocument {
    /// Logical id shared by all shards of one primitive
    pub owner_id: String,
    /// Shard value
    pub value: FieldValue,
    /// Rollup level (counters only)
    pub level: Option<Level>,
    /// Creation time (counters only)
    pub time: Option<DateTime<Utc>>,
}

impl ShardDocument {
    /// Shard for a coder or serial: owner and value only
    pub fn plain(owner_id: impl Into<String>, value: FieldValue) -> Self {
        Self {
            owner_id: owner_id.into(),
            value,
            level: None,
            time: None,
        }
    }

    /// Shard for a counter level
    pub fn counter(
        owner_id: impl Into<String>,
        value: FieldValue,
        level: Level,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            value,
            level: Some(level),
            time: Some(time),
        }
    }

    /// Parse a stored document
    pub fn from_document(doc: &Document) -> TallyResult<Self> {
        let owner_id = doc
            .field(FIELD_OWNER_ID)?
            .as_str()
            .ok_or_else(|| {
                TallyError::type_mismatch(
                    FIELD_OWNER_ID,
                    "String",
                    doc.get(FIELD_OWNER_ID).map_or("missing", |v| v.type_name()),
                )
            })?
            .to_string();

        let value = doc.field(FIELD_VALUE)?.clone();
        if !value.is_numeric() {
            return Err(TallyError::type_mismatch(
                FIELD_VALUE,
                "number",
                value.type_name(),
            ));
        }

        let level = match doc.get(FIELD_LEVEL) {
            Some(FieldValue::String(s)) => Some(s.parse::<Level>()?),
            Some(FieldValue::Null) | None => None,
            Some(other) => {
                return Err(TallyError::type_mismatch(
                    FIELD_LEVEL,
                    "String",
                    other.type_name(),
                ))
            }
        };

        let time = match doc.get(FIELD_TIME) {
            Some(FieldValue::Timestamp(t)) => Some(*t),
            Some(FieldValue::Null) | None => None,
            Some(other) => {
                return Err(TallyError::type_mismatch(
                    FIELD_TIME,
                    "Timestamp",
                    other.type_name(),
                ))
            }
        };

        Ok(Self {
            owner_id,
            value,
            level,
            time,
        })
    }

    /// Fields to write when creating this shard
    pub fn into_fields(self) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();
        fields.insert(FIELD_OWNER_ID.to_string(), FieldValue::String(self.owner_id));
        fields.insert(FIELD_VALUE.to_string(), self.value);
        if let Some(level) = self.level {
            fields.insert(
                FIELD_LEVEL.to_string(),
                FieldValue::String(level.as_str().to_string()),
            );
        }
        if let Some(time) = self.time {
            fields.insert(FIELD_TIME.to_string(), FieldValue::Timestamp(time));
        }
        fields
    }
}
