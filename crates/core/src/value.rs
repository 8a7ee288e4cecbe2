//! Field values for shard documents
//!
//! A backing store may hand back the same logical integer as several wire
//! types (signed, unsigned, or an integral float). All numeric coercion for
//! the counting primitives happens here, so their arithmetic only ever sees
//! `i64`, `u64` or `f64`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TallyError, TallyResult};

/// Largest magnitude at which every integer is exactly representable as `f64`
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Value of a single document field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit unsigned integer
    UInt(u64),
    /// 64-bit floating point
    Float(f64),
    /// UTF-8 string
    String(String),
    /// UTC timestamp
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "Null",
            FieldValue::Bool(_) => "Bool",
            FieldValue::Int(_) => "Int",
            FieldValue::UInt(_) => "UInt",
            FieldValue::Float(_) => "Float",
            FieldValue::String(_) => "String",
            FieldValue::Timestamp(_) => "Timestamp",
        }
    }

    /// Check if this value is numeric
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Int(_) | FieldValue::UInt(_) | FieldValue::Float(_)
        )
    }

    /// Get as string slice
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as timestamp
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Convert a numeric value to `f64`
    pub fn to_f64(&self, field: &str) -> TallyResult<f64> {
        match self {
            FieldValue::Int(v) => Ok(*v as f64),
            FieldValue::UInt(v) => Ok(*v as f64),
            FieldValue::Float(v) if v.is_finite() => Ok(*v),
            other => Err(self.mismatch(field, "number", other)),
        }
    }

    /// Convert a numeric value to `i64`
    ///
    /// Floats are accepted only when integral and exactly representable.
    pub fn to_i64(&self, field: &str) -> TallyResult<i64> {
        match self {
            FieldValue::Int(v) => Ok(*v),
            FieldValue::UInt(v) => {
                i64::try_from(*v).map_err(|_| self.mismatch(field, "i64", self))
            }
            FieldValue::Float(v) if v.fract() == 0.0 && v.abs() <= MAX_EXACT_FLOAT_INT => {
                Ok(*v as i64)
            }
            other => Err(self.mismatch(field, "i64", other)),
        }
    }

    /// Convert a numeric value to `u64`
    ///
    /// Negative values are rejected.
    pub fn to_u64(&self, field: &str) -> TallyResult<u64> {
        match self {
            FieldValue::UInt(v) => Ok(*v),
            FieldValue::Int(v) => u64::try_from(*v).map_err(|_| self.mismatch(field, "u64", self)),
            FieldValue::Float(v)
                if v.fract() == 0.0 && *v >= 0.0 && *v <= MAX_EXACT_FLOAT_INT =>
            {
                Ok(*v as u64)
            }
            other => Err(self.mismatch(field, "u64", other)),
        }
    }

    /// Add a numeric delta, as an atomic field increment does
    ///
    /// Integer sums stay integers while they fit; anything else widens to `Float`.
    pub fn checked_add(&self, delta: &FieldValue, field: &str) -> TallyResult<FieldValue> {
        match (self, delta) {
            (FieldValue::Int(a), FieldValue::Int(b)) => Ok(match a.checked_add(*b) {
                Some(sum) => FieldValue::Int(sum),
                None => FieldValue::Float(*a as f64 + *b as f64),
            }),
            (FieldValue::UInt(a), FieldValue::UInt(b)) => Ok(match a.checked_add(*b) {
                Some(sum) => FieldValue::UInt(sum),
                None => FieldValue::Float(*a as f64 + *b as f64),
            }),
            (a, b) => {
                if let (Ok(x), Ok(y)) = (a.to_i64(field), b.to_i64(field)) {
                    if !matches!(a, FieldValue::Float(_)) && !matches!(b, FieldValue::Float(_)) {
                        if let Some(sum) = x.checked_add(y) {
                            return Ok(FieldValue::Int(sum));
                        }
                    }
                }
                Ok(FieldValue::Float(a.to_f64(field)? + b.to_f64(field)?))
            }
        }
    }

    fn mismatch(&self, field: &str, expected: &str, actual: &FieldValue) -> TallyError {
        TallyError::type_mismatch(field, expected, actual.type_name())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}
