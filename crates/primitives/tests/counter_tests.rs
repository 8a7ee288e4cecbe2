//! Counter integration tests
//!
//! Sums under sequential and concurrent increments, and the date hierarchy
//! driven by a manual clock.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tally_concurrency::MemoryStore;
use tally_core::{Clock, Context, ManualClock, RetryConfig};
use tally_primitives::Counter;

// ============================================================================
// Test Helpers
// ============================================================================

fn contended_store() -> Arc<MemoryStore> {
    let retry = RetryConfig::default()
        .with_max_retries(10_000)
        .with_max_delay_ms(2);
    Arc::new(MemoryStore::new(retry))
}

// ============================================================================
// Sums
// ============================================================================

#[test]
fn test_count_all_is_sum_of_increments() {
    let store = Arc::new(MemoryStore::default());
    let counter = Counter::new(Arc::clone(&store), "counters", "clicks", 5);
    let ctx = Context::background();

    let values = [1, 4, 2, 8, 16, 3];
    for v in values {
        counter.increment(&ctx, v).unwrap();
    }

    assert_eq!(counter.count_all(&ctx).unwrap(), values.iter().sum::<i64>() as f64);
    assert!(counter.shards_count(&ctx).unwrap() <= 5);
}

#[test]
fn test_counters_are_isolated_by_owner() {
    let store = Arc::new(MemoryStore::default());
    let a = Counter::new(Arc::clone(&store), "counters", "a", 3);
    let b = Counter::new(Arc::clone(&store), "counters", "b", 3);
    let ctx = Context::background();

    a.increment(&ctx, 2).unwrap();
    b.increment(&ctx, 5).unwrap();
    assert!(a.delete(&ctx).unwrap());

    assert_eq!(a.count_all(&ctx).unwrap(), 0.0);
    assert_eq!(b.count_all(&ctx).unwrap(), 5.0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_count_all_matches_any_shard_count(
        num_shards in 1u32..16,
        values in prop::collection::vec(1i64..1000, 1..20),
    ) {
        let store = Arc::new(MemoryStore::default());
        let counter = Counter::new(store, "counters", "prop", num_shards);
        let ctx = Context::background();
        for v in &values {
            counter.increment(&ctx, *v).unwrap();
        }
        let expected: i64 = values.iter().sum();
        prop_assert_eq!(counter.count_all(&ctx).unwrap(), expected as f64);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_increments_are_all_counted() {
    const WORKERS: usize = 8;
    const INCREMENTS: usize = 25;

    let store = contended_store();
    let counter = Arc::new(Counter::new(Arc::clone(&store), "counters", "hits", 4));
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = Context::background();
                barrier.wait();
                for _ in 0..INCREMENTS {
                    counter.increment(&ctx, 1).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let ctx = Context::background();
    assert_eq!(counter.count_all(&ctx).unwrap(), (WORKERS * INCREMENTS) as f64);
}

#[test]
fn test_concurrent_hierarchy_increments_keep_levels_consistent() {
    const WORKERS: usize = 4;
    const INCREMENTS: usize = 10;

    let store = contended_store();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    ));
    let counter = Arc::new(
        Counter::new(Arc::clone(&store), "counters", "rollup", 2)
            .with_date_hierarchy(true)
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>),
    );
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let ctx = Context::background();
                barrier.wait();
                for _ in 0..INCREMENTS {
                    counter.increment(&ctx, 1).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let ctx = Context::background();
    let total = (WORKERS * INCREMENTS) as f64;
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    assert_eq!(counter.count_all(&ctx).unwrap(), total);
    for level in tally_core::Level::DATE_LEVELS {
        assert_eq!(counter.count_period(&ctx, level, from, to).unwrap(), total);
    }
    // Two shard indexes, five levels each, at most
    assert!(counter.shards_count(&ctx).unwrap() <= 10);
}

// ============================================================================
// Date hierarchy
// ============================================================================

#[test]
fn test_hierarchy_single_increment_creates_five_shards() {
    let store = Arc::new(MemoryStore::default());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 0).unwrap(),
    ));
    let counter = Counter::new(Arc::clone(&store), "counters", "ny", 1)
        .with_date_hierarchy(true)
        .with_clock(Arc::clone(&clock) as Arc<dyn Clock>);
    let ctx = Context::background();

    counter.increment(&ctx, 1).unwrap();
    assert_eq!(counter.shards_count(&ctx).unwrap(), 5);
    counter.increment(&ctx, 1).unwrap();
    assert_eq!(counter.shards_count(&ctx).unwrap(), 5);

    // Crossing into a new year creates a new Year, Month, Day and Hour
    clock.advance(chrono::Duration::minutes(2));
    counter.increment(&ctx, 1).unwrap();
    assert_eq!(counter.shards_count(&ctx).unwrap(), 9);
    assert_eq!(counter.count_all(&ctx).unwrap(), 3.0);
}

#[test]
fn test_enabling_hierarchy_keeps_existing_total() {
    let store = Arc::new(MemoryStore::default());
    let ctx = Context::background();

    Counter::new(Arc::clone(&store), "counters", "late", 1)
        .increment(&ctx, 4)
        .unwrap();

    let hourly = Counter::new(Arc::clone(&store), "counters", "late", 1).with_date_hierarchy(true);
    hourly.increment(&ctx, 1).unwrap();

    assert_eq!(hourly.count_all(&ctx).unwrap(), 5.0);
    assert_eq!(hourly.shards_count(&ctx).unwrap(), 5);
}
