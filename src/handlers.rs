use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::abuse::AbuseGuard;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::engine::InferenceEngine;
use crate::error::{GateError, Result};
use crate::health::{HealthMonitor, HealthStatus, ResourceSampler};
use crate::middleware::AuthContext;
use crate::profiler::PerformanceProfiler;
use crate::rate_limiter::RateLimiter;
use crate::response::{
    ActionResponse, AlertsResponse, KeyIssued, KeyList, ProfileResponse, StatsResponse,
    TaskAccepted,
};
use crate::scheduler::{TaskJob, TaskScheduler};
use crate::validation::{GenerateRequest, IssueKeyRequest, RequestValidator};

/// Shared application state: every admission and execution component.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub credentials: Arc<CredentialStore>,
    pub abuse: Arc<AbuseGuard>,
    pub scheduler: Arc<TaskScheduler>,
    pub health: Arc<HealthMonitor>,
    pub profiler: Arc<PerformanceProfiler>,
    pub engine: Arc<dyn InferenceEngine>,
}

impl AppState {
    pub fn new(
        config: &Config,
        sampler: Arc<dyn ResourceSampler>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit_purge_interval()));
        let credentials = Arc::new(CredentialStore::from_config(
            config.api_keys.as_deref(),
            Arc::clone(&limiter),
            config.rate_limit_window(),
        ));
        let profiler = Arc::new(PerformanceProfiler::new(config.profiler_capacity));
        let scheduler = Arc::new(TaskScheduler::with_profiler(
            config.scheduler(),
            Arc::clone(&profiler),
        ));
        let health = Arc::new(HealthMonitor::new(
            sampler,
            config.health_thresholds(),
            config.history_capacity,
            config.response_window,
        ));

        Self {
            limiter,
            credentials,
            abuse: Arc::new(AbuseGuard::new(config.abuse_threshold)),
            scheduler,
            health,
            profiler,
            engine,
        }
    }
}

fn require_admin(auth: &AuthContext) -> Result<()> {
    if auth.is_admin() {
        Ok(())
    } else {
        tracing::warn!(owner = %auth.owner, "Non-admin credential attempted an admin operation");
        Err(GateError::ScopeDenied("admin".to_string()))
    }
}

/// Public health report; answers 503 while the backend is under critical pressure.
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let report = state.health.check()?;
    let status = match report.status {
        HealthStatus::Critical => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    Ok((status, Json(report)))
}

/// Queue one generation as a task and hand back its id.
pub async fn generate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse> {
    RequestValidator::validate_generate(&request)?;

    let payload = serde_json::to_value(&request)
        .map_err(|e| GateError::Internal(format!("Failed to encode task payload: {}", e)))?;
    let engine = Arc::clone(&state.engine);
    let job: TaskJob = Box::new(move |payload| {
        let request: GenerateRequest = serde_json::from_value(payload)
            .map_err(|e| GateError::Internal(format!("Malformed task payload: {}", e)))?;
        let text = engine.generate(&request.prompt, request.max_length(), request.temperature())?;
        Ok(json!({
            "generated_text": text,
            "engine": engine.name(),
        }))
    });

    let task_id = state.scheduler.submit("generate", payload, job)?;
    tracing::info!(task_id = %task_id, owner = %auth.owner, "Generation queued");

    Ok((StatusCode::ACCEPTED, Json(TaskAccepted::queued(task_id))))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = RequestValidator::validate_task_id(&id)?;
    let snapshot = state.scheduler.status(id).ok_or(GateError::TaskNotFound)?;
    Ok(Json(snapshot))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let id = RequestValidator::validate_task_id(&id)?;
    state.scheduler.try_cancel(id)?;
    Ok(Json(ActionResponse::ok(format!("Task {} cancelled", id))))
}

pub async fn queue_stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(state.scheduler.queue_stats()?))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse> {
    Ok(Json(StatsResponse {
        health: state.health.stats()?,
        queue: state.scheduler.queue_stats()?,
        tracked_rate_limit_keys: state.limiter.tracked_keys(),
    }))
}

pub async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(AlertsResponse::new(state.health.alerts()))
}

pub async fn profile(State(state): State<AppState>) -> impl IntoResponse {
    Json(ProfileResponse::new(state.profiler.all_stats()))
}

pub async fn list_keys(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_admin(&auth)?;
    Ok(Json(KeyList::new(state.credentials.all_stats())))
}

pub async fn issue_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<IssueKeyRequest>,
) -> Result<impl IntoResponse> {
    require_admin(&auth)?;
    RequestValidator::validate_issue(&request)?;

    let api_key = state
        .credentials
        .issue(&request.owner, request.rate_limit, request.scopes.clone())?;
    let scopes = state
        .credentials
        .key_stats(&api_key)
        .map(|s| s.allowed_scopes.into_iter().collect())
        .unwrap_or(request.scopes);

    Ok((
        StatusCode::CREATED,
        Json(KeyIssued {
            api_key,
            owner: request.owner,
            rate_limit: request.rate_limit,
            scopes,
            message: "Store this key now, it is not shown again".to_string(),
        }),
    ))
}

pub async fn revoke_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    require_admin(&auth)?;
    let response = if state.credentials.revoke(&key) {
        ActionResponse::ok("API key revoked")
    } else {
        ActionResponse::noop("API key not found")
    };
    Ok(Json(response))
}

pub async fn security_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<impl IntoResponse> {
    require_admin(&auth)?;
    Ok(Json(state.abuse.stats()))
}

pub async fn unblock_origin(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(origin): Path<String>,
) -> Result<impl IntoResponse> {
    require_admin(&auth)?;
    let response = if state.abuse.unblock(&origin) {
        ActionResponse::ok(format!("Origin {} unblocked", origin))
    } else {
        ActionResponse::noop(format!("Origin {} was not blocked", origin))
    };
    Ok(Json(response))
}
