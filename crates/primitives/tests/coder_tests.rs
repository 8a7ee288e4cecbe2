//! Coder integration tests
//!
//! Uniqueness of numbers and codes across shards and threads.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;
use tally_concurrency::MemoryStore;
use tally_core::{Context, DocumentStore, RetryConfig};
use tally_primitives::{decode_code, CodeWidth, Coder};

fn contended_store() -> Arc<MemoryStore> {
    let retry = RetryConfig::default()
        .with_max_retries(10_000)
        .with_max_delay_ms(2);
    Arc::new(MemoryStore::new(retry))
}

#[test]
fn test_single_shard_is_strictly_increasing() {
    let store = Arc::new(MemoryStore::default());
    let coder = Coder::new(Arc::clone(&store), "codes", "orders", 1);
    let ctx = Context::background();

    let mut last = 0;
    for _ in 0..20 {
        let n = store
            .begin_transaction(&ctx, |tx| {
                let pending = coder.number_rx(&ctx, tx)?;
                coder.number_wx(&ctx, tx, pending)
            })
            .unwrap();
        assert!(n > last);
        last = n;
    }
}

#[test]
fn test_concurrent_numbers_and_codes_are_distinct() {
    const WORKERS: usize = 8;
    const PER_WORKER: usize = 20;

    let store = contended_store();
    let coder = Arc::new(Coder::new(Arc::clone(&store), "codes", "coupons", 5));
    let barrier = Arc::new(Barrier::new(WORKERS));
    let issued = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let coder = Arc::clone(&coder);
            let barrier = Arc::clone(&barrier);
            let issued = Arc::clone(&issued);
            thread::spawn(move || {
                let ctx = Context::background();
                barrier.wait();
                for _ in 0..PER_WORKER {
                    let n = store
                        .begin_transaction(&ctx, |tx| {
                            let pending = coder.number_rx(&ctx, tx)?;
                            coder.number_wx(&ctx, tx, pending)
                        })
                        .unwrap();
                    issued.lock().push(n);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let numbers = issued.lock().clone();
    assert_eq!(numbers.len(), WORKERS * PER_WORKER);
    let distinct: HashSet<u64> = numbers.iter().copied().collect();
    assert_eq!(distinct.len(), numbers.len());

    for width in [CodeWidth::Bits16, CodeWidth::Bits32, CodeWidth::Bits64] {
        let codes: HashSet<String> = numbers
            .iter()
            .map(|n| tally_primitives::encode_code(*n, width).unwrap())
            .collect();
        assert_eq!(codes.len(), numbers.len());
    }
}

#[test]
fn test_code_variants_are_pairwise_distinct() {
    let store = contended_store();
    let coder = Coder::new(Arc::clone(&store), "codes", "vouchers", 10);
    let ctx = Context::background();

    let mut code16 = HashSet::new();
    let mut code32 = HashSet::new();
    let mut code64 = HashSet::new();
    for _ in 0..50 {
        let a = store
            .begin_transaction(&ctx, |tx| {
                let pending = coder.code16_rx(&ctx, tx)?;
                coder.code16_wx(&ctx, tx, pending)
            })
            .unwrap();
        let b = store
            .begin_transaction(&ctx, |tx| {
                let pending = coder.code_rx(&ctx, tx)?;
                coder.code_wx(&ctx, tx, pending)
            })
            .unwrap();
        let c = store
            .begin_transaction(&ctx, |tx| {
                let pending = coder.code64_rx(&ctx, tx)?;
                coder.code64_wx(&ctx, tx, pending)
            })
            .unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 6);
        assert_eq!(c.len(), 11);
        assert!(code16.insert(a));
        assert!(code32.insert(b));
        assert!(code64.insert(c));
    }
}

#[test]
fn test_codes_decode_to_reserved_numbers() {
    let store = Arc::new(MemoryStore::default());
    let coder = Coder::new(Arc::clone(&store), "codes", "tickets", 3);
    let ctx = Context::background();

    let (number, code) = store
        .begin_transaction(&ctx, |tx| {
            let pending = coder.code_rx(&ctx, tx)?;
            let number = pending.number();
            Ok((number, coder.code_wx(&ctx, tx, pending)?))
        })
        .unwrap();

    assert_eq!(decode_code(&code, CodeWidth::Bits32).unwrap(), number);
    // First reservation on any of three shards
    assert!((3..6).contains(&number));
}

#[test]
fn test_delete_removes_all_shards() {
    let store = Arc::new(MemoryStore::default());
    let coder = Coder::new(Arc::clone(&store), "codes", "promo", 4);
    let ctx = Context::background();
    for _ in 0..12 {
        coder.number(&ctx).unwrap();
    }
    assert!(coder.shards_count(&ctx).unwrap() >= 1);
    assert!(coder.delete(&ctx).unwrap());
    assert_eq!(coder.shards_count(&ctx).unwrap(), 0);
}
