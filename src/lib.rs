//! Tally - sharded counting over optimistic document stores
//!
//! A single document under optimistic transactions sustains roughly one
//! successful write per second. Tally provides three primitives that work
//! within that limit:
//!
//! - [`Counter`]: high-throughput approximate counting over N shards, with
//!   optional Year/Month/Day/Hour rollups
//! - [`Coder`]: unique numbers and short URL-safe codes over N shards
//! - [`Serial`]: strictly increasing numbers from one document
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tally::{Context, Counter, DocumentStore, MemoryStore, TallyConfig};
//!
//! let store = Arc::new(MemoryStore::open(&TallyConfig::default()));
//! let views = Counter::new(Arc::clone(&store), "counters", "home", 10);
//! let ctx = Context::background();
//!
//! // Inside a caller-managed transaction: reads first, then writes
//! store.begin_transaction(&ctx, |tx| {
//!     let pending = views.increment_rx(&ctx, tx)?;
//!     views.increment_wx(&ctx, tx, pending, 1)
//! })?;
//!
//! assert_eq!(views.count_all(&ctx)?, 1.0);
//! ```
//!
//! # Architecture
//!
//! - `tally-core`: errors, context, documents, addressing, config, store traits
//! - `tally-concurrency`: in-memory optimistic store implementing the traits
//! - `tally-primitives`: Counter, Coder, Serial
//!
//! Any store that offers an optimistic multi-document transaction with retry
//! and an atomic numeric increment can back the primitives by implementing
//! [`DocumentStore`].

pub use tally_concurrency::{MemoryStore, StoreStats};
pub use tally_core::*;
pub use tally_primitives::*;
