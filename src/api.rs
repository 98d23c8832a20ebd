use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::SyncError;
use crate::guard::{AccessGuard, SessionStatus};
use crate::history::ReportHistory;
use crate::sync::merge::CanonicalStore;
use crate::sync::scheduler::SyncScheduler;
use crate::sync::types::{CanonicalRecord, RefreshJob, RefreshReport};

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SyncScheduler>,
    pub guard: Arc<AccessGuard>,
    pub history: Arc<ReportHistory>,
    pub store: Arc<dyn CanonicalStore>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/refresh/{job_id}", post(trigger_refresh))
        .route("/visibility", post(visibility))
        .route("/session/signin", post(session_signin))
        .route("/session/extend", post(session_extend))
        .route("/session/ack-warning", post(session_ack_warning))
        .route("/session/signout", post(session_signout))
        .route("/session/status", get(session_status))
        .route("/debug/jobs", get(debug_jobs))
        .route("/debug/reports", get(debug_reports))
        .route("/debug/record", get(debug_record))
        .route("/admin/job-config", post(admin_job_config))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// The UI passes a stable client id; anonymous callers share one bucket.
fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get("x-client-id")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("ui")
        .to_string()
}

fn status_for(e: &SyncError) -> StatusCode {
    match e {
        SyncError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        SyncError::SessionExpired => StatusCode::UNAUTHORIZED,
        SyncError::RunInProgress(_) => StatusCode::CONFLICT,
        SyncError::JobDisabled(_) => StatusCode::CONFLICT,
        SyncError::UnknownJob(_) => StatusCode::NOT_FOUND,
        SyncError::Config(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn trigger_refresh(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RefreshReport>, (StatusCode, String)> {
    let caller = caller_id(&headers);
    state
        .scheduler
        .trigger_now(&job_id, &caller)
        .await
        .map(Json)
        .map_err(|e| (status_for(&e), e.to_string()))
}

#[derive(serde::Deserialize)]
struct VisibilityReq {
    visible: bool,
}

async fn visibility(
    State(state): State<AppState>,
    Json(body): Json<VisibilityReq>,
) -> &'static str {
    state.scheduler.on_visibility_change(body.visible);
    "ok"
}

#[derive(serde::Deserialize)]
struct SignInReq {
    user_id: String,
}

async fn session_signin(
    State(state): State<AppState>,
    Json(body): Json<SignInReq>,
) -> Json<Option<SessionStatus>> {
    state.guard.sessions.sign_in(&body.user_id);
    Json(state.guard.sessions.status())
}

async fn session_extend(State(state): State<AppState>) -> Json<Option<SessionStatus>> {
    state.guard.sessions.extend();
    Json(state.guard.sessions.status())
}

async fn session_ack_warning(State(state): State<AppState>) -> &'static str {
    state.guard.sessions.acknowledge_warning();
    "ok"
}

async fn session_signout(State(state): State<AppState>) -> &'static str {
    state.guard.sessions.clear();
    "signed out"
}

async fn session_status(State(state): State<AppState>) -> Json<Option<SessionStatus>> {
    Json(state.guard.sessions.status())
}

async fn debug_jobs(State(state): State<AppState>) -> Json<Vec<RefreshJob>> {
    Json(state.scheduler.snapshot_jobs())
}

async fn debug_reports(State(state): State<AppState>) -> Json<Vec<RefreshReport>> {
    Json(state.history.snapshot_last_n(10))
}

async fn debug_record(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Option<CanonicalRecord>> {
    let key = q.get("key").cloned().unwrap_or_default();
    Json(state.store.get(&key))
}

#[derive(serde::Deserialize)]
struct JobConfigReq {
    job_id: String,
    #[serde(default)]
    interval_ms: Option<u64>,
    #[serde(default)]
    enabled: Option<bool>,
}

/// Mutating entry point: pays the same guard checks as a manual trigger.
async fn admin_job_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<JobConfigReq>,
) -> Result<&'static str, (StatusCode, String)> {
    let caller = caller_id(&headers);
    state
        .guard
        .authorize_trigger(&caller)
        .and_then(|_| {
            state
                .scheduler
                .update_job_config(&body.job_id, body.interval_ms, body.enabled)
        })
        .map(|_| "updated")
        .map_err(|e| (status_for(&e), e.to_string()))
}
