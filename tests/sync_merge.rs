// tests/sync_merge.rs
//
// Merge engine properties: keep-last dedup, newest-fetched-wins, idempotent
// re-application, and all-or-nothing batch visibility.

use std::sync::Arc;

use odds_board_sync::sync::merge::{CanonicalStore, MemoryStore, MergeEngine};
use odds_board_sync::sync::types::SourceRecord;

fn rec(key: &str, source: &str, fetched_at_ms: u64, v: &str) -> SourceRecord {
    SourceRecord {
        natural_key: key.to_string(),
        source_id: source.to_string(),
        fetched_at_ms,
        // Arbitrary extra field: the properties below hold for any payload.
        payload: serde_json::json!({ "status": v, "seq": rand::random::<u32>() }),
    }
}

fn make_engine() -> (MergeEngine, Arc<dyn CanonicalStore>) {
    let store: Arc<dyn CanonicalStore> = Arc::new(MemoryStore::new());
    (MergeEngine::new(Arc::clone(&store)), store)
}

#[test]
fn applying_same_batch_twice_leaves_store_identical() {
    let (engine, store) = make_engine();
    let batch = vec![
        rec("odds-api:nba:1", "odds-api", 1_000, "scheduled"),
        rec("odds-api:nba:2", "odds-api", 1_000, "in_progress"),
        rec("score-feed:77", "score-feed", 1_000, "final"),
    ];

    let first = engine.apply(batch.clone()).unwrap();
    assert_eq!(first.applied, 3);
    let snapshot = store.snapshot();

    let second = engine.apply(batch).unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.stale, 3);
    assert_eq!(store.snapshot(), snapshot);
}

#[test]
fn later_fetched_at_wins_regardless_of_arrival_order() {
    // Newer first, older second.
    let (engine, store) = make_engine();
    engine.apply(vec![rec("k", "a", 200, "new")]).unwrap();
    engine.apply(vec![rec("k", "b", 100, "old")]).unwrap();
    let got = store.get("k").unwrap();
    assert_eq!(got.fields["status"], "new");
    assert_eq!(got.winning_source_id, "a");

    // Older first, newer second.
    let (engine, store) = make_engine();
    engine.apply(vec![rec("k", "b", 100, "old")]).unwrap();
    engine.apply(vec![rec("k", "a", 200, "new")]).unwrap();
    let got = store.get("k").unwrap();
    assert_eq!(got.fields["status"], "new");
    assert_eq!(got.last_updated_at_ms, 200);
}

#[test]
fn duplicate_keys_within_batch_keep_last_occurrence() {
    let (engine, store) = make_engine();
    let out = engine
        .apply(vec![
            rec("k", "a", 100, "first"),
            rec("other", "a", 100, "x"),
            rec("k", "a", 100, "last"),
        ])
        .unwrap();
    assert_eq!(out.applied, 2);
    assert!(out.conflicts.is_empty());
    assert_eq!(store.get("k").unwrap().fields["status"], "last");
}

#[test]
fn replacement_is_wholesale_not_field_merged() {
    let (engine, store) = make_engine();
    let mut first = rec("k", "a", 100, "in_progress");
    first.payload = serde_json::json!({ "status": "in_progress", "score": 54 });
    engine.apply(vec![first]).unwrap();

    // Newer record without the score field: the old field must not survive.
    engine.apply(vec![rec("k", "a", 200, "final")]).unwrap();
    let got = store.get("k").unwrap();
    assert_eq!(got.fields["status"], "final");
    assert!(got.fields.get("score").is_none());
}

#[test]
fn readers_never_observe_a_partial_batch() {
    let store = Arc::new(MemoryStore::new());
    let reader_store: Arc<dyn CanonicalStore> = store.clone();
    const N: usize = 1_000;

    let reader = std::thread::spawn(move || {
        loop {
            let n = reader_store.len();
            assert!(n == 0 || n == N, "observed partially applied batch: {n}");
            if n == N {
                break;
            }
            std::thread::yield_now();
        }
    });

    let engine = MergeEngine::new(store as Arc<dyn CanonicalStore>);
    let batch: Vec<SourceRecord> = (0..N)
        .map(|i| rec(&format!("k{i}"), "a", 100, "x"))
        .collect();
    engine.apply(batch).unwrap();

    reader.join().unwrap();
}
