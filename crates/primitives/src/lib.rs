//! Counting primitives for Tally
//!
//! Three primitives over a transactional document store:
//! - **Counter**: approximate high-throughput counting across N shards, with
//!   optional Year/Month/Day/Hour rollups
//! - **Coder**: unique numbers and compact URL-safe codes across N shards
//! - **Serial**: strictly increasing numbers from a single document
//!
//! ## Design Principle: Stateless Handles
//!
//! Handles hold only an `Arc` to the store and their identity. Per-call state
//! travels in the pending token a read phase returns:
//!
//! ```rust,ignore
//! store.begin_transaction(&ctx, |tx| {
//!     let views = counter.increment_rx(&ctx, tx)?;
//!     let ticket = serial.number_rx(&ctx, tx)?;
//!     // all reads done; writes follow
//!     counter.increment_wx(&ctx, tx, views, 1)?;
//!     serial.number_wx(&ctx, tx, ticket)
//! })?;
//! ```
//!
//! A write phase accepts only a token read in the same transaction attempt
//! by the same primitive; anything else is `MissingReadPhase`. Tokens are
//! not `Clone` and are moved into the write phase, so a second write for one
//! read does not compile.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod coder;
pub mod counter;
pub mod serial;
pub mod shard_meta;

pub use codec::{decode_code, encode_code, CodeWidth};
pub use coder::{Coder, PendingCode, PendingNumber};
pub use counter::{Counter, LevelShard, PendingIncrement};
pub use serial::{PendingSerial, Serial};
pub use shard_meta::{count_value, ReadStamp, ShardMeta};
