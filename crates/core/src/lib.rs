//! Core types and traits for Tally
//!
//! This crate defines the foundational types shared by the store and the
//! counting primitives:
//! - Error: `TallyError` taxonomy and `TallyResult`
//! - Context: cancellation and deadlines checked before every store request
//! - FieldValue: canonical field values with the single numeric coercion point
//! - Document / ShardDocument: the stored shard schema (`OwnerID`, `Value`, `Level`, `Time`)
//! - DocKey / Level / addressing: deterministic shard document keys
//! - Clock: injectable time source for date rollups
//! - Config: `TallyConfig` loaded from `tally.toml`
//! - Traits: `DocumentStore` and `Transaction`, the consumed store surface

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addressing;
pub mod clock;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod traits;
pub mod types;
pub mod value;

pub use addressing::{counter_shard_key, shard_key};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AdminConfig, CoderConfig, CounterConfig, RetryConfig, TallyConfig};
pub use context::Context;
pub use document::{Document, ShardDocument, FIELD_LEVEL, FIELD_OWNER_ID, FIELD_TIME, FIELD_VALUE};
pub use error::{TallyError, TallyResult};
pub use traits::{DocumentStore, Transaction};
pub use types::{DocKey, Level};
pub use value::FieldValue;
