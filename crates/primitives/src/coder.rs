//! Coder: sharded unique numbers and compact codes
//!
//! Each shard keeps its own sequence. A number packs the per-shard value
//! with the shard index:
//!
//! ```text
//! number = per_shard_value * num_shards + shard_index     (per_shard_value >= 1)
//! ```
//!
//! Two different (shard, value) pairs can never give the same number, and
//! with one shard the numbers are strictly increasing. Codes are numbers run
//! through [`encode_code`](crate::codec::encode_code) at a fixed width.
//!
//! Size `num_shards` at roughly 100x the expected concurrent callers per
//! second.

use std::sync::Arc;

use rand::Rng;
use tally_core::{
    shard_key, AdminConfig, Context, DocKey, DocumentStore, FieldValue, ShardDocument, TallyConfig,
    TallyError, TallyResult, Transaction, FIELD_VALUE,
};
use tracing::debug;

use crate::codec::{encode_code, CodeWidth};
use crate::shard_meta::{ReadStamp, ShardMeta};

/// Result of `number_rx`, consumed by `number_wx`
///
/// Moved into the write phase; a second `number_wx` for one read does not
/// compile:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use tally_concurrency::MemoryStore;
/// use tally_core::{Context, DocumentStore};
/// use tally_primitives::Coder;
///
/// let store = Arc::new(MemoryStore::default());
/// let coder = Coder::new(Arc::clone(&store), "codes", "coupon", 1);
/// let ctx = Context::background();
/// store
///     .begin_transaction(&ctx, |tx| {
///         let pending = coder.number_rx(&ctx, tx)?;
///         coder.number_wx(&ctx, tx, pending)?;
///         coder.number_wx(&ctx, tx, pending)
///     })
///     .unwrap();
/// ```
///
/// ```compile_fail
/// fn duplicate(pending: &tally_primitives::PendingNumber) -> tally_primitives::PendingNumber {
///     pending.clone()
/// }
/// ```
#[derive(Debug)]
#[must_use = "a pending number is not reserved until passed to number_wx"]
pub struct PendingNumber {
    stamp: ReadStamp,
    index: u32,
    key: DocKey,
    exists: bool,
    number: u64,
}

impl PendingNumber {
    /// Number the write phase will reserve
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Picked shard index
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Result of a code read phase, consumed by the matching write phase
///
/// ```compile_fail
/// use std::sync::Arc;
/// use tally_concurrency::MemoryStore;
/// use tally_core::{Context, DocumentStore};
/// use tally_primitives::Coder;
///
/// let store = Arc::new(MemoryStore::default());
/// let coder = Coder::new(Arc::clone(&store), "codes", "coupon", 1);
/// let ctx = Context::background();
/// store
///     .begin_transaction(&ctx, |tx| {
///         let pending = coder.code_rx(&ctx, tx)?;
///         coder.code_wx(&ctx, tx, pending)?;
///         coder.code_wx(&ctx, tx, pending)
///     })
///     .unwrap();
/// ```
///
/// ```compile_fail
/// fn duplicate(pending: &tally_primitives::PendingCode) -> tally_primitives::PendingCode {
///     pending.clone()
/// }
/// ```
#[derive(Debug)]
#[must_use = "a pending code is not reserved until passed to a code write phase"]
pub struct PendingCode {
    number: PendingNumber,
    width: CodeWidth,
    code: String,
}

impl PendingCode {
    /// Code the write phase will reserve
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Number behind the code
    pub fn number(&self) -> u64 {
        self.number.number
    }

    /// Width of the code
    pub fn width(&self) -> CodeWidth {
        self.width
    }
}

/// Sharded number and code generator
pub struct Coder<S: DocumentStore> {
    store: Arc<S>,
    meta: ShardMeta,
    max_delete_rounds: usize,
}

impl<S: DocumentStore> Coder<S> {
    /// Create a coder over `num_shards` shards
    pub fn new(
        store: Arc<S>,
        collection: impl Into<String>,
        owner: impl Into<String>,
        num_shards: u32,
    ) -> Self {
        Self {
            store,
            meta: ShardMeta::new(collection, owner, num_shards),
            max_delete_rounds: AdminConfig::default().max_delete_rounds,
        }
    }

    /// Create a coder using the `[coder]` and `[admin]` settings
    pub fn from_config(
        store: Arc<S>,
        config: &TallyConfig,
        collection: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let mut coder = Self::new(store, collection, owner, config.coder.num_shards);
        coder.max_delete_rounds = config.admin.max_delete_rounds;
        coder
    }

    /// Shared identity and bulk operations
    pub fn meta(&self) -> &ShardMeta {
        &self.meta
    }

    /// Read phase: the next number of a randomly picked shard
    pub fn number_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingNumber> {
        self.meta.check(ctx)?;
        self.meta.ensure_in_transaction(tx)?;

        let num_shards = self.meta.num_shards();
        let index = rand::thread_rng().gen_range(0..num_shards);
        let key = shard_key(self.meta.collection(), self.meta.owner(), None, None, index);

        let stored = tx
            .get(&key)
            .map_err(|e| e.with_store_context("number_rx", self.meta.owner(), &key))?;
        let (exists, per_shard) = match stored {
            Some(doc) => {
                let current = doc.field(FIELD_VALUE)?.to_u64(FIELD_VALUE)?;
                (true, current.saturating_add(1))
            }
            None => (false, 1),
        };

        let number = per_shard
            .checked_mul(u64::from(num_shards))
            .and_then(|n| n.checked_add(u64::from(index)))
            .ok_or(TallyError::CapacityExceeded {
                width_bits: 64,
                number: per_shard,
            })?;

        Ok(PendingNumber {
            stamp: self.meta.stamp(tx),
            index,
            key,
            exists,
            number,
        })
    }

    /// Write phase: reserve the number read by `number_rx`
    pub fn number_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingNumber,
    ) -> TallyResult<u64> {
        self.meta.check_write(ctx, tx, &pending.stamp)?;

        let result = if pending.exists {
            tx.increment(pending.key.clone(), FIELD_VALUE, FieldValue::Int(1))
        } else {
            let doc = ShardDocument::plain(self.meta.owner(), FieldValue::Int(1));
            tx.set(pending.key.clone(), doc.into_fields(), false)
        };
        result.map_err(|e| e.with_store_context("number_wx", self.meta.owner(), &pending.key))?;

        debug!(
            target: "tally::coder",
            owner = %self.meta.owner(),
            index = pending.index,
            number = pending.number,
            "Number reserved"
        );
        Ok(pending.number)
    }

    /// Reserve a number in a transaction of its own
    pub fn number(&self, ctx: &Context) -> TallyResult<u64> {
        self.store.begin_transaction(ctx, |tx| {
            let pending = self.number_rx(ctx, tx)?;
            self.number_wx(ctx, tx, pending)
        })
    }

    /// Read phase of a code of `width`
    ///
    /// Fails with `CapacityExceeded` once the shard sequences outgrow the width.
    pub fn code_rx_width(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        width: CodeWidth,
    ) -> TallyResult<PendingCode> {
        let number = self.number_rx(ctx, tx)?;
        let code = encode_code(number.number, width)?;
        Ok(PendingCode {
            number,
            width,
            code,
        })
    }

    /// Write phase of a code of `width`
    ///
    /// The token must come from a read phase of the same width.
    pub fn code_wx_width(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingCode,
        width: CodeWidth,
    ) -> TallyResult<String> {
        if pending.width != width {
            return Err(TallyError::missing_read_phase(
                self.meta.owner(),
                format!(
                    "token holds a {}-bit code, not {}-bit",
                    pending.width.bits(),
                    width.bits()
                ),
            ));
        }
        self.number_wx(ctx, tx, pending.number)?;
        Ok(pending.code)
    }

    /// Read phase of a 32-bit code (6 characters)
    pub fn code_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingCode> {
        self.code_rx_width(ctx, tx, CodeWidth::Bits32)
    }

    /// Write phase of a 32-bit code
    pub fn code_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingCode,
    ) -> TallyResult<String> {
        self.code_wx_width(ctx, tx, pending, CodeWidth::Bits32)
    }

    /// Read phase of a 16-bit code (3 characters)
    pub fn code16_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingCode> {
        self.code_rx_width(ctx, tx, CodeWidth::Bits16)
    }

    /// Write phase of a 16-bit code
    pub fn code16_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingCode,
    ) -> TallyResult<String> {
        self.code_wx_width(ctx, tx, pending, CodeWidth::Bits16)
    }

    /// Read phase of a 64-bit code (11 characters)
    pub fn code64_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingCode> {
        self.code_rx_width(ctx, tx, CodeWidth::Bits64)
    }

    /// Write phase of a 64-bit code
    pub fn code64_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingCode,
    ) -> TallyResult<String> {
        self.code_wx_width(ctx, tx, pending, CodeWidth::Bits64)
    }

    /// Reserve a code of `width` in a transaction of its own
    pub fn code(&self, ctx: &Context, width: CodeWidth) -> TallyResult<String> {
        self.store.begin_transaction(ctx, |tx| {
            let pending = self.code_rx_width(ctx, tx, width)?;
            self.code_wx_width(ctx, tx, pending, width)
        })
    }

    /// Delete every shard; `true` once none remain
    pub fn delete(&self, ctx: &Context) -> TallyResult<bool> {
        self.meta
            .delete_shards(self.store.as_ref(), ctx, self.max_delete_rounds)
    }

    /// Number of shard documents
    pub fn shards_count(&self, ctx: &Context) -> TallyResult<usize> {
        self.meta.shards_count(self.store.as_ref(), ctx)
    }
}
