//! Read/write phase protocol tests
//!
//! Every primitive follows the same contract inside a store transaction:
//! - read phases run before any write phase in the attempt
//! - a write phase needs a token read in the same attempt by the same primitive
//! - neither phase runs outside an active transaction or on a done context

use std::sync::Arc;
use std::time::Duration;

use tally_concurrency::MemoryStore;
use tally_core::{
    Context, DocKey, Document, DocumentStore, FieldValue, TallyError, FIELD_LEVEL, FIELD_OWNER_ID,
    FIELD_VALUE,
};
use tally_primitives::{Coder, Counter, Serial};

struct Fixture {
    store: Arc<MemoryStore>,
    counter: Counter<MemoryStore>,
    coder: Coder<MemoryStore>,
    serial: Serial<MemoryStore>,
}

fn setup() -> Fixture {
    let store = Arc::new(MemoryStore::default());
    Fixture {
        counter: Counter::new(Arc::clone(&store), "counters", "page", 3),
        coder: Coder::new(Arc::clone(&store), "codes", "order", 3),
        serial: Serial::new(Arc::clone(&store), "serials", "ticket"),
        store,
    }
}

// ============================================================================
// NotInTransaction
// ============================================================================

mod not_in_transaction {
    use super::*;

    #[test]
    fn test_rx_after_commit_fails() {
        let f = setup();
        let ctx = Context::background();
        let mut txn = f.store.begin().unwrap();
        f.store.commit(&mut txn).unwrap();

        assert!(matches!(
            f.counter.increment_rx(&ctx, &mut txn),
            Err(TallyError::NotInTransaction { .. })
        ));
        assert!(matches!(
            f.coder.number_rx(&ctx, &mut txn),
            Err(TallyError::NotInTransaction { .. })
        ));
        assert!(matches!(
            f.serial.number_rx(&ctx, &mut txn),
            Err(TallyError::NotInTransaction { .. })
        ));
    }

    #[test]
    fn test_wx_after_abort_fails() {
        let f = setup();
        let ctx = Context::background();
        let mut txn = f.store.begin().unwrap();
        let pending = f.serial.number_rx(&ctx, &mut txn).unwrap();
        f.store.abort(&mut txn, "caller gave up").unwrap();

        assert!(matches!(
            f.serial.number_wx(&ctx, &mut txn, pending),
            Err(TallyError::NotInTransaction { .. })
        ));
    }
}

// ============================================================================
// MissingReadPhase
// ============================================================================

mod missing_read_phase {
    use super::*;

    #[test]
    fn test_token_from_earlier_attempt_is_rejected() {
        let f = setup();
        let ctx = Context::background();

        let mut first = f.store.begin().unwrap();
        let stale = f.counter.increment_rx(&ctx, &mut first).unwrap();
        f.store.abort(&mut first, "retry").unwrap();

        let mut second = f.store.begin().unwrap();
        assert!(matches!(
            f.counter.increment_wx(&ctx, &mut second, stale, 1),
            Err(TallyError::MissingReadPhase { .. })
        ));
        assert!(second.writes.is_empty());
    }

    #[test]
    fn test_token_from_another_counter_is_rejected() {
        let f = setup();
        let other = Counter::new(Arc::clone(&f.store), "counters", "other", 3);
        let ctx = Context::background();

        let mut txn = f.store.begin().unwrap();
        let pending = other.increment_rx(&ctx, &mut txn).unwrap();
        let err = f.counter.increment_wx(&ctx, &mut txn, pending, 1).unwrap_err();
        assert!(matches!(err, TallyError::MissingReadPhase { .. }));
        assert!(err.is_programmer_error());
    }

    #[test]
    fn test_code_token_of_wrong_width_is_rejected() {
        let f = setup();
        let ctx = Context::background();
        let mut txn = f.store.begin().unwrap();
        let pending = f.coder.code64_rx(&ctx, &mut txn).unwrap();
        assert!(matches!(
            f.coder.code16_wx(&ctx, &mut txn, pending),
            Err(TallyError::MissingReadPhase { .. })
        ));
    }

    // Tokens move into the write phase (not Clone, see the compile_fail
    // doctests on the token types). After a write the only source of a new
    // token is another read, which the attempt refuses.
    #[test]
    fn test_second_wx_for_one_rx_is_rejected() {
        let f = setup();
        let ctx = Context::background();
        let mut txn = f.store.begin().unwrap();

        let hit = f.counter.increment_rx(&ctx, &mut txn).unwrap();
        let number = f.coder.number_rx(&ctx, &mut txn).unwrap();
        let ticket = f.serial.number_rx(&ctx, &mut txn).unwrap();
        f.counter.increment_wx(&ctx, &mut txn, hit, 1).unwrap();
        assert_eq!(f.coder.number_wx(&ctx, &mut txn, number).unwrap() / 3, 1);
        assert_eq!(f.serial.number_wx(&ctx, &mut txn, ticket).unwrap(), 1);

        assert!(f.counter.increment_rx(&ctx, &mut txn).unwrap_err().is_store_error());
        assert!(f.coder.number_rx(&ctx, &mut txn).unwrap_err().is_store_error());
        assert!(f.coder.code_rx(&ctx, &mut txn).unwrap_err().is_store_error());
        assert!(f.serial.number_rx(&ctx, &mut txn).unwrap_err().is_store_error());
        f.store.commit(&mut txn).unwrap();

        assert_eq!(f.counter.count_all(&ctx).unwrap(), 1.0);
        assert_eq!(f.serial.next(&ctx).unwrap(), 2);
        assert_eq!(f.coder.shards_count(&ctx).unwrap(), 1);
    }

    #[test]
    fn test_each_code_write_advances_its_shard_once() {
        let f = setup();
        let single = Coder::new(Arc::clone(&f.store), "codes", "single", 1);
        let ctx = Context::background();

        let codes: Vec<String> = (0..3)
            .map(|_| {
                f.store
                    .begin_transaction(&ctx, |tx| {
                        let pending = single.code_rx(&ctx, tx)?;
                        single.code_wx(&ctx, tx, pending)
                    })
                    .unwrap()
            })
            .collect();

        let numbers: Vec<u64> = codes
            .iter()
            .map(|c| tally_primitives::decode_code(c, tally_primitives::CodeWidth::Bits32).unwrap())
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}

// ============================================================================
// Ordering within one attempt
// ============================================================================

mod ordering {
    use super::*;

    #[test]
    fn test_all_reads_then_all_writes_commits_every_primitive() {
        let f = setup();
        let ctx = Context::background();

        let (code, ticket) = f
            .store
            .begin_transaction(&ctx, |tx| {
                let hit = f.counter.increment_rx(&ctx, tx)?;
                let code = f.coder.code_rx(&ctx, tx)?;
                let ticket = f.serial.number_rx(&ctx, tx)?;

                f.counter.increment_wx(&ctx, tx, hit, 1)?;
                let code = f.coder.code_wx(&ctx, tx, code)?;
                let ticket = f.serial.number_wx(&ctx, tx, ticket)?;
                Ok((code, ticket))
            })
            .unwrap();

        assert_eq!(code.len(), 6);
        assert_eq!(ticket, 1);
        assert_eq!(f.counter.count_all(&ctx).unwrap(), 1.0);
    }

    #[test]
    fn test_read_after_write_is_a_store_error() {
        let f = setup();
        let ctx = Context::background();

        let result = f.store.begin_transaction(&ctx, |tx| {
            let hit = f.counter.increment_rx(&ctx, tx)?;
            f.counter.increment_wx(&ctx, tx, hit, 1)?;
            f.serial.number_rx(&ctx, tx).map(|p| p.number())
        });

        let err = result.unwrap_err();
        assert!(err.is_store_error());
        match err {
            TallyError::Store { operation, owner, .. } => {
                assert_eq!(operation, "number_rx");
                assert_eq!(owner, "ticket");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(f.counter.count_all(&ctx).unwrap(), 0.0);
    }
}

// ============================================================================
// Cancellation and configuration
// ============================================================================

mod preconditions {
    use super::*;

    #[test]
    fn test_canceled_context_fails_fast() {
        let f = setup();
        let ctx = Context::background();
        let mut txn = f.store.begin().unwrap();

        let canceled = ctx.child();
        canceled.cancel();
        assert!(f
            .counter
            .increment_rx(&canceled, &mut txn)
            .unwrap_err()
            .is_canceled());
        assert!(f.counter.count_all(&canceled).unwrap_err().is_canceled());
        assert!(txn.read_set.is_empty());
        // The parent is unaffected
        assert!(f.counter.increment_rx(&ctx, &mut txn).is_ok());
    }

    #[test]
    fn test_expired_deadline_is_canceled() {
        let f = setup();
        let ctx = Context::background().with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(1));
        assert!(f.serial.next(&ctx).unwrap_err().is_canceled());
        assert_eq!(f.store.stats().started, 0);
    }

    #[test]
    fn test_empty_identity_is_invalid_configuration() {
        let f = setup();
        let ctx = Context::background();
        let nameless = Serial::new(Arc::clone(&f.store), "serials", "");
        assert!(matches!(
            nameless.next(&ctx),
            Err(TallyError::InvalidConfiguration { .. })
        ));
        let homeless = Counter::new(Arc::clone(&f.store), "", "page", 1);
        assert!(matches!(
            homeless.count_all(&ctx),
            Err(TallyError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_closed_store_surfaces_store_error_with_context() {
        let f = setup();
        let ctx = Context::background();
        f.store.close();
        match f.counter.count_all(&ctx).unwrap_err() {
            TallyError::Store {
                operation,
                collection,
                owner,
                ..
            } => {
                assert_eq!(operation, "count_all");
                assert_eq!(collection, "counters");
                assert_eq!(owner, "page");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}

// ============================================================================
// Data integrity
// ============================================================================

#[test]
fn test_non_numeric_shard_value_is_type_mismatch() {
    let f = setup();
    let ctx = Context::background();
    let mut doc = Document::new();
    doc.set(FIELD_OWNER_ID, FieldValue::from("page"));
    doc.set(FIELD_LEVEL, FieldValue::from("Total"));
    doc.set(FIELD_VALUE, FieldValue::from("lots"));
    f.store
        .insert_document(DocKey::new("counters", "page_0"), doc)
        .unwrap();

    assert!(matches!(
        f.counter.count_all(&ctx),
        Err(TallyError::TypeMismatch { .. })
    ));
}

#[test]
fn test_mixed_numeric_representations_are_summed() {
    let f = setup();
    let ctx = Context::background();
    for (i, value) in [FieldValue::Int(2), FieldValue::UInt(3), FieldValue::Float(1.5)]
        .into_iter()
        .enumerate()
    {
        let mut doc = Document::new();
        doc.set(FIELD_OWNER_ID, FieldValue::from("page"));
        doc.set(FIELD_LEVEL, FieldValue::from("Total"));
        doc.set(FIELD_VALUE, value);
        f.store
            .insert_document(DocKey::new("counters", format!("page_{}", i)), doc)
            .unwrap();
    }
    assert_eq!(f.counter.count_all(&ctx).unwrap(), 6.5);
}
