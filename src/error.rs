// src/error.rs
use thiserror::Error;

/// Failure taxonomy for the sync core. Per-adapter and per-key failures are
/// captured into the refresh report; only configuration errors are fatal.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, 5xx, or timeout. Retried on the next scheduled tick,
    /// never within the same run.
    #[error("transient fetch failure: {0}")]
    FetchTransient(String),

    /// 4xx or malformed payload. Logged; the run continues for other sources.
    #[error("permanent fetch failure: {0}")]
    FetchPermanent(String),

    /// The store rejected one key. Sibling keys in the batch are unaffected.
    #[error("merge conflict on key {key}")]
    MergeConflict { key: String },

    /// The store rejected the whole batch (e.g. backend unavailable).
    #[error("merge failed: {0}")]
    Merge(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("session expired")]
    SessionExpired,

    /// A trigger landed while the job was already running; coalesced, not queued.
    #[error("refresh already running for job '{0}'")]
    RunInProgress(String),

    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job '{0}' is disabled")]
    JobDisabled(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub fn transient(msg: impl Into<String>) -> Self {
        SyncError::FetchTransient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        SyncError::FetchPermanent(msg.into())
    }
}
