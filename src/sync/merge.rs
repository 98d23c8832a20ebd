// src/sync/merge.rs
//! Merge/upsert engine: reconciles a batch of normalized source records into
//! the canonical store, atomically per batch.
//!
//! Policy: batches are pre-deduplicated by natural key (last occurrence in
//! input order wins), then each survivor replaces the stored record wholesale
//! iff its `fetched_at_ms` is strictly newer. Field-level merging across
//! sources is rejected; sources are not cross-validated, so partial merges
//! could pair a score with a mismatched status.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use metrics::counter;

use crate::error::SyncError;
use crate::sync::types::{CanonicalRecord, SourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Incoming `fetched_at_ms` not newer than stored state. Not an error.
    Stale,
    /// Unique-constraint violation for this key; sibling keys are unaffected.
    Conflict,
}

/// The keyed-table primitive the engine assumes: atomic upsert-by-natural-key
/// with per-key conflict detection. An external store can be swapped in
/// without touching call sites.
pub trait CanonicalStore: Send + Sync {
    /// Atomic per call: readers observe either all of the batch's decisions
    /// or none of them.
    fn upsert_batch(
        &self,
        batch: Vec<CanonicalRecord>,
    ) -> anyhow::Result<Vec<(String, UpsertOutcome)>>;

    fn get(&self, key: &str) -> Option<CanonicalRecord>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn snapshot(&self) -> Vec<CanonicalRecord>;
}

/// In-memory canonical store for single-instance operation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, CanonicalRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CanonicalStore for MemoryStore {
    fn upsert_batch(
        &self,
        batch: Vec<CanonicalRecord>,
    ) -> anyhow::Result<Vec<(String, UpsertOutcome)>> {
        // Single write-lock acquisition for the whole batch keeps visibility
        // all-or-nothing for readers.
        let mut map = self.inner.write().expect("canonical store lock poisoned");
        let mut seen: HashSet<String> = HashSet::with_capacity(batch.len());
        let mut out = Vec::with_capacity(batch.len());

        for rec in batch {
            let key = rec.key.clone();
            if !seen.insert(key.clone()) {
                // Same key twice in one atomic call violates the unique
                // constraint; the first write stands.
                out.push((key, UpsertOutcome::Conflict));
                continue;
            }
            let outcome = match map.get(&key) {
                None => {
                    map.insert(key.clone(), rec);
                    UpsertOutcome::Inserted
                }
                Some(cur) if rec.last_updated_at_ms > cur.last_updated_at_ms => {
                    map.insert(key.clone(), rec);
                    UpsertOutcome::Replaced
                }
                Some(_) => UpsertOutcome::Stale,
            };
            out.push((key, outcome));
        }
        Ok(out)
    }

    fn get(&self, key: &str) -> Option<CanonicalRecord> {
        self.inner
            .read()
            .expect("canonical store lock poisoned")
            .get(key)
            .cloned()
    }

    fn len(&self) -> usize {
        self.inner.read().expect("canonical store lock poisoned").len()
    }

    fn snapshot(&self) -> Vec<CanonicalRecord> {
        let map = self.inner.read().expect("canonical store lock poisoned");
        let mut v: Vec<CanonicalRecord> = map.values().cloned().collect();
        v.sort_by(|a, b| a.key.cmp(&b.key));
        v
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub applied: usize,
    pub stale: usize,
    pub conflicts: Vec<String>,
}

/// Deduplicate by natural key, keeping the last occurrence in input order.
pub fn dedup_keep_last(batch: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(batch.len());
    let mut out: Vec<SourceRecord> = Vec::with_capacity(batch.len());
    for rec in batch {
        match index.get(&rec.natural_key) {
            Some(&i) => out[i] = rec,
            None => {
                index.insert(rec.natural_key.clone(), out.len());
                out.push(rec);
            }
        }
    }
    out
}

pub struct MergeEngine {
    store: Arc<dyn CanonicalStore>,
}

impl MergeEngine {
    pub fn new(store: Arc<dyn CanonicalStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn CanonicalStore> {
        Arc::clone(&self.store)
    }

    /// Apply one adapter's batch. Identical input applied twice leaves the
    /// store byte-identical after the second call.
    pub fn apply(&self, batch: Vec<SourceRecord>) -> Result<MergeOutcome, SyncError> {
        if batch.is_empty() {
            return Ok(MergeOutcome::default());
        }

        let deduped = dedup_keep_last(batch);
        let records: Vec<CanonicalRecord> =
            deduped.into_iter().map(CanonicalRecord::from_source).collect();

        let results = self
            .store
            .upsert_batch(records)
            .map_err(|e| SyncError::Merge(format!("{e:#}")))?;

        let mut out = MergeOutcome::default();
        for (key, outcome) in results {
            match outcome {
                UpsertOutcome::Inserted | UpsertOutcome::Replaced => out.applied += 1,
                UpsertOutcome::Stale => out.stale += 1,
                UpsertOutcome::Conflict => out.conflicts.push(key),
            }
        }

        counter!("sync_records_applied_total").increment(out.applied as u64);
        counter!("sync_records_stale_total").increment(out.stale as u64);
        Ok(out)
    }
}
