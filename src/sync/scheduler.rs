// src/sync/scheduler.rs
//! Cadence owner: decides *when* refreshes happen, coalesces overlapping
//! triggers, suspends while the dashboard tab is hidden, and fires a single
//! catch-up run on resume when a cadence was missed.
//!
//! Every time-dependent decision takes `now_ms` explicitly so tests drive the
//! state machine without wall-clock waits; the driver task supplies the real
//! clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::error::SyncError;
use crate::guard::AccessGuard;
use crate::history::ReportHistory;
use crate::sync::now_ms;
use crate::sync::orchestrator::Orchestrator;
use crate::sync::types::{
    FetchParams, JobSpec, JobState, RefreshJob, RefreshReport, SUPPORTED_INTERVALS_MS,
};

/// Driver poll cadence. Coarse relative to the supported job intervals.
const DRIVER_TICK_MS: u64 = 1_000;

struct JobEntry {
    source_ids: Vec<String>,
    interval_ms: u64,
    enabled: bool,
    state: JobState,
    last_run_at_ms: Option<u64>,
    last_success_at_ms: Option<u64>,
    /// Bumped on every run start and on stop; in-flight results carrying an
    /// older value are discarded on arrival.
    generation: Arc<AtomicU64>,
    params: FetchParams,
}

struct RunTicket {
    generation: u64,
    gen_live: Arc<AtomicU64>,
    source_ids: Vec<String>,
    params: FetchParams,
}

pub struct SyncScheduler {
    jobs: Mutex<HashMap<String, JobEntry>>,
    orchestrator: Arc<Orchestrator>,
    guard: Arc<AccessGuard>,
    bus: EventBus,
    history: Arc<ReportHistory>,
    visibility_aware: bool,
    visible: AtomicBool,
    stopped: AtomicBool,
}

impl SyncScheduler {
    pub fn new(
        specs: Vec<JobSpec>,
        visibility_aware: bool,
        orchestrator: Arc<Orchestrator>,
        guard: Arc<AccessGuard>,
        bus: EventBus,
        history: Arc<ReportHistory>,
    ) -> Result<Self, SyncError> {
        let mut jobs = HashMap::with_capacity(specs.len());
        for spec in specs {
            validate_interval(spec.interval_ms)?;
            if spec.id.trim().is_empty() {
                return Err(SyncError::Config("job id must not be empty".into()));
            }
            if spec.source_ids.is_empty() {
                return Err(SyncError::Config(format!(
                    "job '{}' has no source ids",
                    spec.id
                )));
            }
            if jobs.contains_key(&spec.id) {
                return Err(SyncError::Config(format!("duplicate job id '{}'", spec.id)));
            }
            jobs.insert(
                spec.id,
                JobEntry {
                    source_ids: spec.source_ids,
                    interval_ms: spec.interval_ms,
                    enabled: spec.enabled,
                    state: JobState::Idle,
                    last_run_at_ms: None,
                    last_success_at_ms: None,
                    generation: Arc::new(AtomicU64::new(0)),
                    params: spec.params,
                },
            );
        }
        Ok(Self {
            jobs: Mutex::new(jobs),
            orchestrator,
            guard,
            bus,
            history,
            visibility_aware,
            visible: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawn the driver task. One coordinating task per process drives all
    /// job timers.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let sched = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(DRIVER_TICK_MS));
            loop {
                ticker.tick().await;
                if sched.stopped.load(Ordering::SeqCst) {
                    break;
                }
                sched.poll_once_at(now_ms()).await;
            }
            tracing::info!("scheduler driver stopped");
        })
    }

    /// Stop scheduling. Best-effort: in-flight fetches are not aborted, their
    /// results are discarded via generation mismatch.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        for (id, entry) in jobs.iter_mut() {
            match entry.state {
                JobState::Running => {
                    entry.state = JobState::Cancelling;
                    entry.generation.fetch_add(1, Ordering::SeqCst);
                    tracing::info!(job = %id, "cancelling in-flight run");
                }
                JobState::Scheduled => entry.state = JobState::Idle,
                _ => {}
            }
        }
    }

    /// Manual trigger: pays both guard checks, then runs to completion.
    /// A trigger landing while the job runs is coalesced, not queued.
    pub async fn trigger_now(
        &self,
        job_id: &str,
        caller: &str,
    ) -> Result<RefreshReport, SyncError> {
        let now = now_ms();
        if let Err(e) = self.guard.authorize_trigger_at(caller, now) {
            counter!("sync_trigger_refused_total").increment(1);
            return Err(e);
        }
        self.run_job_at(job_id, now).await
    }

    /// One driver pass: fire every due job. Returns how many runs started.
    pub async fn poll_once_at(&self, now_ms: u64) -> usize {
        if self.stopped.load(Ordering::SeqCst) {
            return 0;
        }
        if self.visibility_aware && !self.visible.load(Ordering::SeqCst) {
            return 0;
        }

        let mut fired = 0;
        for id in self.due_job_ids_at(now_ms) {
            // Ticks are not caller attempts; only session expiry gates them.
            if let Err(e) = self.guard.authorize_tick_at(now_ms) {
                counter!("sync_trigger_refused_total").increment(1);
                tracing::debug!(job = %id, error = %e, "tick refused");
                continue;
            }
            match self.run_job_at(&id, now_ms).await {
                Ok(report) => {
                    fired += 1;
                    tracing::info!(
                        job = %id,
                        generation = report.generation,
                        sources = report.per_source.len(),
                        failed = report.per_source.iter().filter(|s| s.error.is_some()).count(),
                        "refresh tick"
                    );
                }
                // Coalesced; the next tick retries.
                Err(SyncError::RunInProgress(_)) => {}
                Err(e) => tracing::warn!(job = %id, error = %e, "tick failed"),
            }
        }
        fired
    }

    /// Jobs ready to run at `now_ms`: enabled, not already running, and either
    /// queued for catch-up, never run, or past their cadence.
    pub fn due_job_ids_at(&self, now_ms: u64) -> Vec<String> {
        let jobs = self.jobs.lock().expect("job registry lock poisoned");
        let mut due: Vec<String> = jobs
            .iter()
            .filter_map(|(id, e)| {
                if !e.enabled {
                    return None;
                }
                let ready = match e.state {
                    JobState::Scheduled => true,
                    JobState::Idle => match e.last_run_at_ms {
                        None => true,
                        Some(last) => now_ms.saturating_sub(last) >= e.interval_ms,
                    },
                    JobState::Running | JobState::Cancelling => false,
                };
                ready.then(|| id.clone())
            })
            .collect();
        due.sort();
        due
    }

    /// Visibility signal from the dashboard. Hidden suspends the timers;
    /// becoming visible queues at most one immediate catch-up per overdue job,
    /// otherwise the normal cadence resumes.
    pub fn on_visibility_change(&self, visible: bool) {
        self.on_visibility_change_at(visible, now_ms());
    }

    pub fn on_visibility_change_at(&self, visible: bool, now_ms: u64) {
        self.visible.store(visible, Ordering::SeqCst);
        if !visible || !self.visibility_aware {
            return;
        }
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        for (id, entry) in jobs.iter_mut() {
            if !entry.enabled || entry.state != JobState::Idle {
                continue;
            }
            if let Some(last) = entry.last_run_at_ms {
                if now_ms.saturating_sub(last) > entry.interval_ms {
                    entry.state = JobState::Scheduled;
                    tracing::info!(job = %id, "catch-up refresh queued after visibility resume");
                }
            }
        }
    }

    /// Runtime configuration update for one job. Unsupported cadences are
    /// rejected, not clamped.
    pub fn update_job_config(
        &self,
        job_id: &str,
        interval_ms: Option<u64>,
        enabled: Option<bool>,
    ) -> Result<(), SyncError> {
        if let Some(ms) = interval_ms {
            validate_interval(ms)?;
        }
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| SyncError::UnknownJob(job_id.to_string()))?;
        if let Some(ms) = interval_ms {
            entry.interval_ms = ms;
        }
        if let Some(on) = enabled {
            entry.enabled = on;
            if !on && entry.state == JobState::Scheduled {
                entry.state = JobState::Idle;
            }
        }
        Ok(())
    }

    pub fn snapshot_jobs(&self) -> Vec<RefreshJob> {
        let jobs = self.jobs.lock().expect("job registry lock poisoned");
        let mut out: Vec<RefreshJob> = jobs
            .iter()
            .map(|(id, e)| RefreshJob {
                id: id.clone(),
                source_ids: e.source_ids.clone(),
                interval_ms: e.interval_ms,
                enabled: e.enabled,
                state: e.state,
                last_run_at_ms: e.last_run_at_ms,
                last_success_at_ms: e.last_success_at_ms,
                generation: e.generation.load(Ordering::SeqCst),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    async fn run_job_at(&self, job_id: &str, now_ms: u64) -> Result<RefreshReport, SyncError> {
        let ticket = self.begin_run_at(job_id, now_ms)?;
        let report = self
            .orchestrator
            .run(
                job_id,
                ticket.generation,
                ticket.gen_live,
                &ticket.source_ids,
                &ticket.params,
            )
            .await;
        self.finish_run(job_id, &report);
        Ok(report)
    }

    fn begin_run_at(&self, job_id: &str, now_ms: u64) -> Result<RunTicket, SyncError> {
        let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| SyncError::UnknownJob(job_id.to_string()))?;
        if !entry.enabled {
            return Err(SyncError::JobDisabled(job_id.to_string()));
        }
        match entry.state {
            JobState::Running | JobState::Cancelling => {
                return Err(SyncError::RunInProgress(job_id.to_string()))
            }
            JobState::Idle | JobState::Scheduled => {}
        }
        entry.state = JobState::Running;
        entry.last_run_at_ms = Some(now_ms);
        let generation = entry.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RunTicket {
            generation,
            gen_live: Arc::clone(&entry.generation),
            source_ids: entry.source_ids.clone(),
            params: entry.params.clone(),
        })
    }

    fn finish_run(&self, job_id: &str, report: &RefreshReport) {
        {
            let mut jobs = self.jobs.lock().expect("job registry lock poisoned");
            if let Some(entry) = jobs.get_mut(job_id) {
                let cancelled = entry.state == JobState::Cancelling;
                entry.state = JobState::Idle;
                if !cancelled && report.any_success() {
                    entry.last_success_at_ms = Some(report.finished_at_ms);
                }
            }
        }
        // Outside the lock: history and bus consumers must not hold up the
        // registry.
        self.history.push(report);
        self.bus.publish(report.clone());
    }
}

fn validate_interval(interval_ms: u64) -> Result<(), SyncError> {
    if SUPPORTED_INTERVALS_MS.contains(&interval_ms) {
        Ok(())
    } else {
        Err(SyncError::Config(format!(
            "unsupported interval {interval_ms}ms (supported: {SUPPORTED_INTERVALS_MS:?})"
        )))
    }
}
