//! Shard addressing
//!
//! Pure mapping from (collection, logical id, optional level/period, shard
//! index) to a document key. Key layout: `{OwnerID}{Level?}{PeriodSuffix?}_{ShardIndex}`.
//! The same inputs always address the same document, so existence checks
//! issued in different attempts agree.

use chrono::{DateTime, Utc};

use crate::types::{DocKey, Level};

/// Build the key for one shard document
pub fn shard_key(
    collection: &str,
    owner: &str,
    level: Option<Level>,
    period_suffix: Option<&str>,
    index: u32,
) -> DocKey {
    let mut name = String::with_capacity(owner.len() + 20);
    name.push_str(owner);
    if let Some(level) = level {
        name.push_str(level.as_str());
    }
    if let Some(suffix) = period_suffix {
        name.push_str(suffix);
    }
    name.push('_');
    name.push_str(&index.to_string());
    DocKey::new(collection, name)
}

/// Build the key of a counter shard for `level` at time `at`
///
/// Total shards carry neither level nor period in their key, so a counter
/// keeps its totals when the date hierarchy is switched on later.
pub fn counter_shard_key(
    collection: &str,
    owner: &str,
    level: Level,
    at: &DateTime<Utc>,
    index: u32,
) -> DocKey {
    match level.period_suffix(at) {
        Some(suffix) => shard_key(collection, owner, Some(level), Some(&suffix), index),
        None => shard_key(collection, owner, None, None, index),
    }
}
