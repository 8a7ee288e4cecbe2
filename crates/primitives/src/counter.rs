//! Counter: high-throughput counting over N shards
//!
//! A single document under optimistic transactions tops out at roughly one
//! successful write per second. A counter spreads increments over
//! `num_shards` documents and sums them when read, so totals are eventually
//! consistent rather than point-in-time.
//!
//! ## Two-phase increment
//!
//! ```text
//! let pending = counter.increment_rx(&ctx, tx)?;   // reads only
//! ...other handles' RX...
//! counter.increment_wx(&ctx, tx, pending, 1)?;     // writes only
//! ```
//!
//! ## Date hierarchy
//!
//! With the hierarchy enabled, each increment also lands in the Year, Month,
//! Day and Hour shard for the current UTC period. The Hour shard is created
//! together with every coarser level, so once it exists the read phase
//! issues no further reads.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use smallvec::SmallVec;
use tally_core::{
    counter_shard_key, AdminConfig, Clock, Context, DocKey, Document, DocumentStore, FieldValue,
    Level, ShardDocument, SystemClock, TallyConfig, TallyError, TallyResult, Transaction,
    FIELD_LEVEL, FIELD_TIME, FIELD_VALUE,
};
use tracing::debug;

use crate::shard_meta::{count_value, ReadStamp, ShardMeta};

/// One level's shard as seen by the read phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelShard {
    /// Rollup level
    pub level: Level,
    /// Shard document key
    pub key: DocKey,
    /// Whether the document exists (write increments) or not (write creates)
    pub exists: bool,
}

/// Result of `increment_rx`, consumed by `increment_wx`
///
/// A second write for one read would double-apply or overwrite freshly
/// created shards, so the token is single-use by move:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use tally_concurrency::MemoryStore;
/// use tally_core::{Context, DocumentStore};
/// use tally_primitives::Counter;
///
/// let store = Arc::new(MemoryStore::default());
/// let counter = Counter::new(Arc::clone(&store), "counters", "views", 3);
/// let ctx = Context::background();
/// store
///     .begin_transaction(&ctx, |tx| {
///         let pending = counter.increment_rx(&ctx, tx)?;
///         counter.increment_wx(&ctx, tx, pending, 1)?;
///         counter.increment_wx(&ctx, tx, pending, 1)
///     })
///     .unwrap();
/// ```
///
/// ```compile_fail
/// fn duplicate(pending: &tally_primitives::PendingIncrement) -> tally_primitives::PendingIncrement {
///     pending.clone()
/// }
/// ```
#[derive(Debug)]
#[must_use = "a pending increment does nothing until passed to increment_wx"]
pub struct PendingIncrement {
    stamp: ReadStamp,
    index: u32,
    at: DateTime<Utc>,
    shards: SmallVec<[LevelShard; 5]>,
}

impl PendingIncrement {
    /// Picked shard index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Time the read phase ran; period keys derive from it
    pub fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Shards the write phase will touch, finest level first
    pub fn shards(&self) -> &[LevelShard] {
        &self.shards
    }

    /// Levels whose shard already exists
    pub fn existing_levels(&self) -> Vec<Level> {
        self.shards
            .iter()
            .filter(|s| s.exists)
            .map(|s| s.level)
            .collect()
    }
}

/// Sharded counter handle
///
/// Handles are cheap and hold no per-call state; one handle may serve any
/// number of concurrent transactions.
pub struct Counter<S: DocumentStore> {
    store: Arc<S>,
    meta: ShardMeta,
    date_hierarchy: bool,
    clock: Arc<dyn Clock>,
    max_delete_rounds: usize,
}

impl<S: DocumentStore> Counter<S> {
    /// Create a counter without date hierarchy
    pub fn new(
        store: Arc<S>,
        collection: impl Into<String>,
        owner: impl Into<String>,
        num_shards: u32,
    ) -> Self {
        Self {
            store,
            meta: ShardMeta::new(collection, owner, num_shards),
            date_hierarchy: false,
            clock: Arc::new(SystemClock),
            max_delete_rounds: AdminConfig::default().max_delete_rounds,
        }
    }

    /// Create a counter using the `[counter]` and `[admin]` settings
    pub fn from_config(
        store: Arc<S>,
        config: &TallyConfig,
        collection: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self::new(store, collection, owner, config.counter.num_shards)
            .with_date_hierarchy(config.counter.date_hierarchy)
            .with_max_delete_rounds(config.admin.max_delete_rounds)
    }

    /// Enable or disable Year/Month/Day/Hour rollups
    pub fn with_date_hierarchy(mut self, enabled: bool) -> Self {
        self.date_hierarchy = enabled;
        self
    }

    /// Use `clock` for period keys and shard timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Bound the number of batches `delete` may issue
    pub fn with_max_delete_rounds(mut self, rounds: usize) -> Self {
        self.max_delete_rounds = rounds;
        self
    }

    /// Shared identity and bulk operations
    pub fn meta(&self) -> &ShardMeta {
        &self.meta
    }

    /// Whether rollups are maintained
    pub fn date_hierarchy(&self) -> bool {
        self.date_hierarchy
    }

    /// Read phase of an increment
    ///
    /// Picks a shard uniformly at random and records which of its level
    /// documents exist. Issues no writes.
    pub fn increment_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingIncrement> {
        self.meta.check(ctx)?;
        self.meta.ensure_in_transaction(tx)?;

        let index = rand::thread_rng().gen_range(0..self.meta.num_shards());
        let at = self.clock.now();
        let mut shards: SmallVec<[LevelShard; 5]> = SmallVec::new();

        if self.date_hierarchy {
            // Finest first: the first level found implies all coarser ones
            let mut found = false;
            for level in Level::DATE_LEVELS.iter().rev() {
                let key = self.shard_key(*level, &at, index);
                let exists = found || self.exists(ctx, tx, &key)?;
                found = exists;
                shards.push(LevelShard {
                    level: *level,
                    key,
                    exists,
                });
            }
            let key = self.shard_key(Level::Total, &at, index);
            let exists = shards[0].exists || self.exists(ctx, tx, &key)?;
            shards.push(LevelShard {
                level: Level::Total,
                key,
                exists,
            });
        } else {
            let key = self.shard_key(Level::Total, &at, index);
            let exists = self.exists(ctx, tx, &key)?;
            shards.push(LevelShard {
                level: Level::Total,
                key,
                exists,
            });
        }

        Ok(PendingIncrement {
            stamp: self.meta.stamp(tx),
            index,
            at,
            shards,
        })
    }

    /// Write phase of an increment
    ///
    /// Creates each missing level shard with `Value = value` and atomically
    /// increments each existing one. `value` must be positive.
    pub fn increment_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingIncrement,
        value: i64,
    ) -> TallyResult<()> {
        self.meta.check_write(ctx, tx, &pending.stamp)?;
        if value <= 0 {
            return Err(TallyError::invalid_input(format!(
                "increment must be positive, got {}",
                value
            )));
        }

        let mut created = 0;
        for shard in pending.shards {
            let result = if shard.exists {
                tx.increment(shard.key.clone(), FIELD_VALUE, FieldValue::Int(value))
            } else {
                created += 1;
                let doc = ShardDocument::counter(
                    self.meta.owner(),
                    FieldValue::Int(value),
                    shard.level,
                    pending.at,
                );
                tx.set(shard.key.clone(), doc.into_fields(), false)
            };
            result.map_err(|e| e.with_store_context("increment_wx", self.meta.owner(), &shard.key))?;
        }

        debug!(
            target: "tally::counter",
            owner = %self.meta.owner(),
            index = pending.index,
            created,
            value,
            "Increment buffered"
        );
        Ok(())
    }

    /// Increment by `value` in a transaction of its own
    pub fn increment(&self, ctx: &Context, value: i64) -> TallyResult<()> {
        self.store.begin_transaction(ctx, |tx| {
            let pending = self.increment_rx(ctx, tx)?;
            self.increment_wx(ctx, tx, pending, value)
        })
    }

    /// Sum of all Total shards
    ///
    /// Runs outside any transaction so it never contends with writers; the
    /// result is eventually consistent.
    pub fn count_all(&self, ctx: &Context) -> TallyResult<f64> {
        self.meta.check(ctx)?;
        let docs = self.level_docs(ctx, Level::Total, "count_all")?;
        count_value(docs.iter())
    }

    /// Sum of `level` shards whose period starts in `[from, to)`
    pub fn count_period(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> TallyResult<f64> {
        Ok(self.detail_period(ctx, level, from, to)?.values().sum())
    }

    /// Per-period sums of `level` shards whose period starts in `[from, to)`
    ///
    /// Keys are period starts. Periods with no shards are absent.
    pub fn detail_period(
        &self,
        ctx: &Context,
        level: Level,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> TallyResult<BTreeMap<DateTime<Utc>, f64>> {
        self.meta.check(ctx)?;
        if !level.is_dated() {
            return Err(TallyError::invalid_input(
                "period queries need a date level; use count_all for Total",
            ));
        }
        if from >= to {
            return Err(TallyError::invalid_input(format!(
                "empty period range [{}, {})",
                from, to
            )));
        }

        let mut buckets = BTreeMap::new();
        for doc in self.level_docs(ctx, level, "detail_period")? {
            let shard = ShardDocument::from_document(&doc)?;
            let time = shard
                .time
                .ok_or_else(|| TallyError::type_mismatch(FIELD_TIME, "Timestamp", "missing"))?;
            let start = level.period_start(&time)?;
            if start >= from && start < to {
                *buckets.entry(start).or_insert(0.0) += shard.value.to_f64(FIELD_VALUE)?;
            }
        }
        Ok(buckets)
    }

    /// Delete every shard of this counter; `true` once none remain
    pub fn delete(&self, ctx: &Context) -> TallyResult<bool> {
        self.meta
            .delete_shards(self.store.as_ref(), ctx, self.max_delete_rounds)
    }

    /// Number of shard documents across all levels and periods
    pub fn shards_count(&self, ctx: &Context) -> TallyResult<usize> {
        self.meta.shards_count(self.store.as_ref(), ctx)
    }

    fn shard_key(&self, level: Level, at: &DateTime<Utc>, index: u32) -> DocKey {
        counter_shard_key(self.meta.collection(), self.meta.owner(), level, at, index)
    }

    fn exists(&self, ctx: &Context, tx: &mut S::Txn, key: &DocKey) -> TallyResult<bool> {
        ctx.check()?;
        tx.get(key)
            .map(|doc| doc.is_some())
            .map_err(|e| e.with_store_context("increment_rx", self.meta.owner(), key))
    }

    fn level_docs(
        &self,
        ctx: &Context,
        level: Level,
        operation: &str,
    ) -> TallyResult<Vec<Document>> {
        let wanted = FieldValue::from(level.as_str());
        Ok(self
            .meta
            .query_owned(self.store.as_ref(), ctx, operation)?
            .into_iter()
            .filter(|(_, doc)| doc.get(FIELD_LEVEL) == Some(&wanted))
            .map(|(_, doc)| doc)
            .collect())
    }
}
