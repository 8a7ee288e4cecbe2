//! Serial: strictly increasing numbers from one document
//!
//! Serial does not shard. Every number passes through the same document, so
//! the sequence has no gaps or repeats among committed transactions, and
//! throughput is bounded by the store's single-document write rate. Keep
//! usage low-frequency; use [`Coder`](crate::coder::Coder) when throughput
//! matters more than ordering.

use std::sync::Arc;

use tally_core::{
    shard_key, AdminConfig, Context, DocKey, DocumentStore, FieldValue, ShardDocument, TallyConfig,
    TallyResult, Transaction, FIELD_VALUE,
};
use tracing::debug;

use crate::shard_meta::{ReadStamp, ShardMeta};

/// Result of `number_rx`, consumed by `number_wx`
///
/// Each read phase yields exactly one write. The token moves into
/// `number_wx`, so spending it twice does not compile:
///
/// ```compile_fail
/// use std::sync::Arc;
/// use tally_concurrency::MemoryStore;
/// use tally_core::{Context, DocumentStore};
/// use tally_primitives::Serial;
///
/// let store = Arc::new(MemoryStore::default());
/// let serial = Serial::new(Arc::clone(&store), "serials", "ticket");
/// let ctx = Context::background();
/// store
///     .begin_transaction(&ctx, |tx| {
///         let pending = serial.number_rx(&ctx, tx)?;
///         serial.number_wx(&ctx, tx, pending)?;
///         serial.number_wx(&ctx, tx, pending)
///     })
///     .unwrap();
/// ```
///
/// Nor can it be copied first:
///
/// ```compile_fail
/// fn duplicate(pending: &tally_primitives::PendingSerial) -> tally_primitives::PendingSerial {
///     pending.clone()
/// }
/// ```
#[derive(Debug)]
#[must_use = "a pending serial is not reserved until passed to number_wx"]
pub struct PendingSerial {
    stamp: ReadStamp,
    exists: bool,
    number: u64,
}

impl PendingSerial {
    /// Number the write phase will reserve
    pub fn number(&self) -> u64 {
        self.number
    }
}

/// Unsharded serial number generator
pub struct Serial<S: DocumentStore> {
    store: Arc<S>,
    meta: ShardMeta,
    max_delete_rounds: usize,
}

impl<S: DocumentStore> Serial<S> {
    /// Create a serial backed by a single document
    pub fn new(store: Arc<S>, collection: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            store,
            meta: ShardMeta::new(collection, owner, 1),
            max_delete_rounds: AdminConfig::default().max_delete_rounds,
        }
    }

    /// Create a serial using the `[admin]` settings
    pub fn from_config(
        store: Arc<S>,
        config: &TallyConfig,
        collection: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        let mut serial = Self::new(store, collection, owner);
        serial.max_delete_rounds = config.admin.max_delete_rounds;
        serial
    }

    /// Shared identity and bulk operations
    pub fn meta(&self) -> &ShardMeta {
        &self.meta
    }

    /// Key of the backing document
    pub fn key(&self) -> DocKey {
        shard_key(self.meta.collection(), self.meta.owner(), None, None, 0)
    }

    /// Read phase: stored value + 1, or 1 if nothing is stored yet
    pub fn number_rx(&self, ctx: &Context, tx: &mut S::Txn) -> TallyResult<PendingSerial> {
        self.meta.check(ctx)?;
        self.meta.ensure_in_transaction(tx)?;

        let key = self.key();
        let stored = tx
            .get(&key)
            .map_err(|e| e.with_store_context("number_rx", self.meta.owner(), &key))?;
        let (exists, number) = match stored {
            Some(doc) => (
                true,
                doc.field(FIELD_VALUE)?.to_u64(FIELD_VALUE)?.saturating_add(1),
            ),
            None => (false, 1),
        };

        Ok(PendingSerial {
            stamp: self.meta.stamp(tx),
            exists,
            number,
        })
    }

    /// Write phase: reserve the number read by `number_rx`
    pub fn number_wx(
        &self,
        ctx: &Context,
        tx: &mut S::Txn,
        pending: PendingSerial,
    ) -> TallyResult<u64> {
        self.meta.check_write(ctx, tx, &pending.stamp)?;

        let key = self.key();
        let result = if pending.exists {
            tx.increment(key.clone(), FIELD_VALUE, FieldValue::Int(1))
        } else {
            let doc = ShardDocument::plain(self.meta.owner(), FieldValue::Int(1));
            tx.set(key.clone(), doc.into_fields(), false)
        };
        result.map_err(|e| e.with_store_context("number_wx", self.meta.owner(), &key))?;

        debug!(target: "tally::serial", owner = %self.meta.owner(), number = pending.number, "Serial reserved");
        Ok(pending.number)
    }

    /// Reserve the next number in a transaction of its own
    pub fn next(&self, ctx: &Context) -> TallyResult<u64> {
        self.store.begin_transaction(ctx, |tx| {
            let pending = self.number_rx(ctx, tx)?;
            self.number_wx(ctx, tx, pending)
        })
    }

    /// Reset the sequence by deleting the backing document in a transaction
    pub fn clear(&self, ctx: &Context) -> TallyResult<()> {
        self.meta.check(ctx)?;
        let key = self.key();
        self.store
            .begin_transaction(ctx, |tx| tx.delete(key.clone()))
            .map_err(|e| e.with_store_context("clear", self.meta.owner(), &key))
    }

    /// Delete every document owned by this serial; `true` once none remain
    pub fn delete(&self, ctx: &Context) -> TallyResult<bool> {
        self.meta
            .delete_shards(self.store.as_ref(), ctx, self.max_delete_rounds)
    }

    /// Number of documents owned by this serial (0 or 1)
    pub fn shards_count(&self, ctx: &Context) -> TallyResult<usize> {
        self.meta.shards_count(self.store.as_ref(), ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_concurrency::MemoryStore;
    use tally_core::TallyError;

    fn setup() -> (Arc<MemoryStore>, Serial<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let serial = Serial::new(Arc::clone(&store), "serials", "ticket");
        (store, serial)
    }

    #[test]
    fn test_first_number_is_one() {
        let (store, serial) = setup();
        let ctx = Context::background();
        let mut txn = store.begin().unwrap();
        assert_eq!(serial.number_rx(&ctx, &mut txn).unwrap().number(), 1);
    }

    #[test]
    fn test_second_rx_returns_two() {
        let (store, serial) = setup();
        let ctx = Context::background();
        assert_eq!(serial.next(&ctx).unwrap(), 1);

        let mut txn = store.begin().unwrap();
        let pending = serial.number_rx(&ctx, &mut txn).unwrap();
        assert_eq!(pending.number(), 2);
        assert_eq!(serial.number_wx(&ctx, &mut txn, pending).unwrap(), 2);
    }

    #[test]
    fn test_backing_key() {
        let (_store, serial) = setup();
        assert_eq!(serial.key(), DocKey::new("serials", "ticket_0"));
    }

    #[test]
    fn test_clear_restarts_sequence() {
        let (_store, serial) = setup();
        let ctx = Context::background();
        serial.next(&ctx).unwrap();
        serial.next(&ctx).unwrap();
        serial.clear(&ctx).unwrap();
        assert_eq!(serial.shards_count(&ctx).unwrap(), 0);
        assert_eq!(serial.next(&ctx).unwrap(), 1);
    }

    #[test]
    fn test_delete() {
        let (_store, serial) = setup();
        let ctx = Context::background();
        serial.next(&ctx).unwrap();
        assert_eq!(serial.shards_count(&ctx).unwrap(), 1);
        assert!(serial.delete(&ctx).unwrap());
        assert_eq!(serial.shards_count(&ctx).unwrap(), 0);
    }

    #[test]
    fn test_non_numeric_value_is_type_mismatch() {
        let (store, serial) = setup();
        let ctx = Context::background();
        let mut doc = tally_core::Document::new();
        doc.set(tally_core::FIELD_OWNER_ID, FieldValue::from("ticket"));
        doc.set(FIELD_VALUE, FieldValue::from("seven"));
        store.insert_document(serial.key(), doc).unwrap();

        assert!(matches!(
            serial.next(&ctx),
            Err(TallyError::TypeMismatch { .. })
        ));
    }
}
