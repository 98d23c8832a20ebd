// src/sync/types.rs
use anyhow::Result;

use crate::sync::fingerprint;

/// Cadences the scheduler accepts. Anything else is rejected at configuration
/// time, not silently clamped.
pub const SUPPORTED_INTERVALS_MS: [u64; 5] = [120_000, 180_000, 300_000, 600_000, 900_000];

/// One normalized record from an upstream provider. Two fetches against an
/// unchanged upstream must yield identical `natural_key` + `payload`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceRecord {
    /// Stable identifier derived from upstream ids, prefixed by the source id
    /// so keys never collide across sources.
    pub natural_key: String,
    pub source_id: String,
    /// Stamped from the adapter's local clock at call time, not an upstream
    /// timestamp; keeps freshness comparisons consistent across providers.
    pub fetched_at_ms: u64,
    pub payload: serde_json::Value,
}

/// The single canonical row per natural key, owned by the merge engine.
/// Never partially updated; replaced wholesale by a newer source record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CanonicalRecord {
    pub key: String,
    pub fields: serde_json::Value,
    pub last_updated_at_ms: u64,
    pub winning_source_id: String,
    /// Short digest of `fields`; lets idempotent re-application show up as a
    /// byte-identical store in tests and debug output.
    pub fingerprint: String,
}

impl CanonicalRecord {
    pub fn from_source(rec: SourceRecord) -> Self {
        let fp = fingerprint(&rec.payload);
        CanonicalRecord {
            key: rec.natural_key,
            fields: rec.payload,
            last_updated_at_ms: rec.fetched_at_ms,
            winning_source_id: rec.source_id,
            fingerprint: fp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    /// A catch-up trigger has been queued (visibility flip) but not yet
    /// picked up by the driver.
    Scheduled,
    Running,
    Cancelling,
}

/// Snapshot of one refresh job as seen by the debug API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshJob {
    pub id: String,
    pub source_ids: Vec<String>,
    pub interval_ms: u64,
    pub enabled: bool,
    pub state: JobState,
    pub last_run_at_ms: Option<u64>,
    pub last_success_at_ms: Option<u64>,
    pub generation: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    /// Records applied to the canonical store from this source.
    pub records: usize,
    pub error: Option<String>,
}

/// Produced once per run, immutable after creation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RefreshReport {
    pub job_id: String,
    pub generation: u64,
    pub per_source: Vec<SourceOutcome>,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

impl RefreshReport {
    /// True when at least one source merged without error.
    pub fn any_success(&self) -> bool {
        self.per_source.iter().any(|s| s.error.is_none())
    }
}

/// Opaque fetch parameters handed to every adapter in a run.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FetchParams {
    pub sport: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub credential_ref: Option<String>,
}

/// One implementation per upstream provider. `fetch` is finite and not
/// restartable mid-stream; a fresh call re-fetches from scratch.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, params: &FetchParams) -> Result<Vec<SourceRecord>>;
    fn source_id(&self) -> &'static str;
}

fn default_enabled() -> bool {
    true
}

/// Static job definition as it appears in configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub source_ids: Vec<String>,
    pub interval_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: FetchParams,
}

