// src/sync/orchestrator.rs
//! Fan-out runner: pulls from every registered source concurrently, isolates
//! per-adapter failure, merges each surviving batch, and aggregates one
//! refresh report per run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::error::SyncError;
use crate::sync::merge::MergeEngine;
use crate::sync::types::{FetchParams, RefreshReport, SourceAdapter, SourceOutcome, SourceRecord};
use crate::sync::{ensure_metrics_described, now_ms};

pub struct Orchestrator {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
    merge: MergeEngine,
    adapter_timeout_ms: u64,
}

impl Orchestrator {
    pub fn new(merge: MergeEngine, adapter_timeout_ms: u64) -> Self {
        Self {
            adapters: HashMap::new(),
            merge,
            adapter_timeout_ms,
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_id().to_string(), adapter);
    }

    pub fn adapter_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn merge_engine(&self) -> &MergeEngine {
        &self.merge
    }

    /// Run one refresh for `job_id` at `generation`. All adapters are
    /// dispatched concurrently and the run waits for every one to settle;
    /// one adapter's failure or timeout is attributed to that adapter only.
    /// Results arriving after `gen_live` has moved past `generation` are
    /// discarded instead of merged.
    pub async fn run(
        &self,
        job_id: &str,
        generation: u64,
        gen_live: Arc<AtomicU64>,
        source_ids: &[String],
        params: &FetchParams,
    ) -> RefreshReport {
        ensure_metrics_described();
        let started_at_ms = now_ms();
        counter!("sync_runs_total").increment(1);

        let timeout = Duration::from_millis(self.adapter_timeout_ms);
        let mut handles = Vec::with_capacity(source_ids.len());
        for sid in source_ids {
            let handle = self.adapters.get(sid).map(|adapter| {
                let adapter = Arc::clone(adapter);
                let params = params.clone();
                tokio::spawn(async move {
                    let t0 = std::time::Instant::now();
                    let res = tokio::time::timeout(timeout, adapter.fetch(&params)).await;
                    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
                    histogram!("sync_fetch_ms").record(ms);
                    res
                })
            });
            handles.push((sid.clone(), handle));
        }

        // Tasks are already running; awaiting them in order only affects the
        // order of report entries, which mirrors the job's source list.
        let mut per_source = Vec::with_capacity(handles.len());
        for (sid, handle) in handles {
            let outcome = match handle {
                None => {
                    self.record_failure(job_id, &sid, "unregistered source adapter".to_string())
                }
                Some(h) => match h.await {
                    Err(join_err) => self.record_failure(
                        job_id,
                        &sid,
                        SyncError::permanent(format!("adapter task failed: {join_err}"))
                            .to_string(),
                    ),
                    Ok(Err(_elapsed)) => self.record_failure(
                        job_id,
                        &sid,
                        SyncError::transient(format!(
                            "timeout after {}ms",
                            self.adapter_timeout_ms
                        ))
                        .to_string(),
                    ),
                    Ok(Ok(Err(fetch_err))) => {
                        self.record_failure(job_id, &sid, classify_fetch_error(fetch_err))
                    }
                    Ok(Ok(Ok(records))) => {
                        self.merge_settled(job_id, &sid, generation, &gen_live, records)
                    }
                },
            };
            per_source.push(outcome);
        }

        let finished_at_ms = now_ms();
        gauge!("sync_last_run_ts").set((finished_at_ms / 1_000) as f64);

        RefreshReport {
            job_id: job_id.to_string(),
            generation,
            per_source,
            started_at_ms,
            finished_at_ms,
        }
    }

    fn record_failure(&self, job_id: &str, source_id: &str, error: String) -> SourceOutcome {
        tracing::warn!(job = job_id, source = source_id, %error, "adapter failed");
        counter!("sync_adapter_errors_total").increment(1);
        SourceOutcome {
            source_id: source_id.to_string(),
            records: 0,
            error: Some(error),
        }
    }

    fn merge_settled(
        &self,
        job_id: &str,
        source_id: &str,
        generation: u64,
        gen_live: &AtomicU64,
        records: Vec<SourceRecord>,
    ) -> SourceOutcome {
        // A stop or a newer run moved the job past this generation while the
        // fetch was in flight; a late result must not overwrite newer state.
        if gen_live.load(Ordering::SeqCst) != generation {
            tracing::info!(
                job = job_id,
                source = source_id,
                generation,
                "discarding result from superseded run"
            );
            return SourceOutcome {
                source_id: source_id.to_string(),
                records: 0,
                error: Some("discarded (stale generation)".to_string()),
            };
        }

        match self.merge.apply(records) {
            Ok(outcome) => {
                let error = if outcome.conflicts.is_empty() {
                    None
                } else {
                    Some(format!(
                        "{} ({} conflicting key(s))",
                        SyncError::MergeConflict {
                            key: outcome.conflicts[0].clone()
                        },
                        outcome.conflicts.len()
                    ))
                };
                tracing::debug!(
                    job = job_id,
                    source = source_id,
                    applied = outcome.applied,
                    stale = outcome.stale,
                    "batch merged"
                );
                SourceOutcome {
                    source_id: source_id.to_string(),
                    records: outcome.applied,
                    error,
                }
            }
            Err(e) => self.record_failure(job_id, source_id, e.to_string()),
        }
    }
}

/// Adapters tag their own failures with the taxonomy where they can tell;
/// anything unclassified lands in the permanent (malformed payload) bucket.
fn classify_fetch_error(err: anyhow::Error) -> String {
    match err.downcast_ref::<SyncError>() {
        Some(e @ (SyncError::FetchTransient(_) | SyncError::FetchPermanent(_))) => e.to_string(),
        _ => SyncError::permanent(format!("{err:#}")).to_string(),
    }
}
