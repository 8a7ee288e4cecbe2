//! ShardMeta: validation and bulk operations shared by every primitive
//!
//! A primitive is identified by (collection, owner). All of its shard
//! documents carry `OwnerID == owner`, so counting and deleting them is a
//! single equality query regardless of shard index or period.

use tally_core::{
    Context, DocKey, Document, DocumentStore, FieldValue, TallyError, TallyResult, Transaction,
    FIELD_OWNER_ID, FIELD_VALUE,
};
use tracing::{debug, warn};

/// Identity and shard count of one logical primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMeta {
    collection: String,
    owner: String,
    num_shards: u32,
}

impl ShardMeta {
    /// Describe a primitive; nothing is validated until `check`
    pub fn new(collection: impl Into<String>, owner: impl Into<String>, num_shards: u32) -> Self {
        Self {
            collection: collection.into(),
            owner: owner.into(),
            num_shards,
        }
    }

    /// Collection holding the shards
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Logical id shared by all shards
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Number of shards
    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    /// Validate identity, then the context
    ///
    /// `InvalidConfiguration` for an empty collection/id or zero shards,
    /// `Canceled` if the context is done.
    pub fn check(&self, ctx: &Context) -> TallyResult<()> {
        if self.collection.is_empty() {
            return Err(TallyError::invalid_configuration("collection is empty"));
        }
        if self.owner.is_empty() {
            return Err(TallyError::invalid_configuration("id is empty"));
        }
        if self.num_shards == 0 {
            return Err(TallyError::invalid_configuration(format!(
                "'{}' has zero shards",
                self.owner
            )));
        }
        ctx.check()
    }

    /// Count every document owned by this primitive
    pub fn shards_count<S: DocumentStore>(&self, store: &S, ctx: &Context) -> TallyResult<usize> {
        self.check(ctx)?;
        Ok(self.query_owned(store, ctx, "shards_count")?.len())
    }

    /// Documents owned by this primitive, ordered by key
    pub fn query_owned<S: DocumentStore>(
        &self,
        store: &S,
        ctx: &Context,
        operation: &str,
    ) -> TallyResult<Vec<(DocKey, Document)>> {
        store
            .query_eq(
                ctx,
                &self.collection,
                FIELD_OWNER_ID,
                &FieldValue::from(self.owner.as_str()),
            )
            .map_err(|e| e.with_store_context(operation, &self.owner, &self.collection_key()))
    }

    /// Delete every owned document in batches of at most `num_shards + 1`
    ///
    /// Each batch is deleted in its own transaction. Returns `true` once no
    /// owned document remains, `false` if `max_rounds` batches were not
    /// enough.
    pub fn delete_shards<S: DocumentStore>(
        &self,
        store: &S,
        ctx: &Context,
        max_rounds: usize,
    ) -> TallyResult<bool> {
        self.check(ctx)?;
        let batch = self.num_shards as usize + 1;

        for round in 0..max_rounds {
            let owned = self.query_owned(store, ctx, "delete_shards")?;
            if owned.is_empty() {
                debug!(target: "tally::meta", owner = %self.owner, rounds = round, "Shards deleted");
                return Ok(true);
            }

            let keys: Vec<DocKey> = owned.into_iter().take(batch).map(|(key, _)| key).collect();
            store
                .begin_transaction(ctx, |tx| {
                    for key in &keys {
                        tx.delete(key.clone())?;
                    }
                    Ok(())
                })
                .map_err(|e| e.with_store_context("delete_shards", &self.owner, &keys[0]))?;
        }

        let done = self.query_owned(store, ctx, "delete_shards")?.is_empty();
        if !done {
            warn!(
                target: "tally::meta",
                owner = %self.owner,
                max_rounds,
                "Shard deletion stopped before completion"
            );
        }
        Ok(done)
    }

    /// Fail with `NotInTransaction` unless `tx` accepts operations
    pub fn ensure_in_transaction<T: Transaction>(&self, tx: &T) -> TallyResult<()> {
        if tx.is_active() {
            Ok(())
        } else {
            Err(TallyError::not_in_transaction(tx.state()))
        }
    }

    /// Stamp identifying a read phase run by this primitive in `tx`
    pub fn stamp<T: Transaction>(&self, tx: &T) -> ReadStamp {
        ReadStamp {
            txn_id: tx.id(),
            collection: self.collection.clone(),
            owner: self.owner.clone(),
        }
    }

    /// Common preamble of every write phase
    pub fn check_write<T: Transaction>(
        &self,
        ctx: &Context,
        tx: &T,
        stamp: &ReadStamp,
    ) -> TallyResult<()> {
        self.check(ctx)?;
        self.ensure_in_transaction(tx)?;
        stamp.verify(self, tx)
    }

    fn collection_key(&self) -> DocKey {
        DocKey::new(self.collection.clone(), String::new())
    }
}

/// Where a pending token's read phase ran
///
/// A write phase accepts a token only in the same transaction attempt and
/// for the same primitive that produced it. A retried attempt gets a new
/// transaction id, so tokens never leak across attempts. Stamps are not
/// `Clone`, so neither are the tokens holding them.
#[derive(Debug, PartialEq, Eq)]
pub struct ReadStamp {
    txn_id: u64,
    collection: String,
    owner: String,
}

impl ReadStamp {
    /// Transaction attempt the read ran in
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    fn verify<T: Transaction>(&self, meta: &ShardMeta, tx: &T) -> TallyResult<()> {
        if self.collection != meta.collection || self.owner != meta.owner {
            return Err(TallyError::missing_read_phase(
                meta.owner.clone(),
                format!("token was read for '{}/{}'", self.collection, self.owner),
            ));
        }
        if self.txn_id != tx.id() {
            return Err(TallyError::missing_read_phase(
                meta.owner.clone(),
                format!(
                    "token was read in transaction {}, not {}",
                    self.txn_id,
                    tx.id()
                ),
            ));
        }
        Ok(())
    }
}

/// Sum `Value` over a set of shard documents
///
/// Every numeric representation is accepted; anything else is a
/// `TypeMismatch`.
pub fn count_value<'a, I>(docs: I) -> TallyResult<f64>
where
    I: IntoIterator<Item = &'a Document>,
{
    docs.into_iter().try_fold(0.0, |sum, doc| {
        Ok(sum + doc.field(FIELD_VALUE)?.to_f64(FIELD_VALUE)?)
    })
}
