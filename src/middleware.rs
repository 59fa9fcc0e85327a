use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::info;

use crate::credentials::ADMIN_OWNER;
use crate::error::{ErrorKind, GateError};
use crate::extract::{api_key, client_origin};
use crate::handlers::AppState;

/// Identity attached to every request that passed admission.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub key: String,
    pub owner: String,
    pub scopes: BTreeSet<String>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.owner == ADMIN_OWNER
    }
}

/// Scope name guarding a path: the first segment after `/api/`.
pub fn resource_for(path: &str) -> &str {
    let rest = path.strip_prefix("/api/").unwrap_or(path.trim_start_matches('/'));
    rest.split('/').next().unwrap_or(rest)
}

/// Origin block, then credential, then rate limit, then scope.
pub async fn admission_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, GateError> {
    let origin = client_origin(&request);
    if state.abuse.is_blocked(&origin) {
        tracing::warn!(origin = %origin, uri = %request.uri(), "Rejected request from blocked origin");
        return Err(GateError::OriginBlocked);
    }

    let Some(key) = api_key(&request) else {
        let err = GateError::MissingCredential;
        state.abuse.record_failure(&origin, err.kind());
        return Err(err);
    };

    let validated = match state.credentials.validate(&key) {
        Ok(validated) => validated,
        Err(err @ GateError::UnknownCredential) => {
            state.abuse.record_failure(&origin, err.kind());
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let resource = resource_for(request.uri().path()).to_string();
    if !state.credentials.check_scope(&key, &resource) {
        tracing::warn!(owner = %validated.owner, resource = %resource, "Credential lacks scope");
        return Err(GateError::ScopeDenied(resource));
    }

    let limit = validated.rate_limit.limit;
    let remaining = validated.rate_limit.remaining;
    request.extensions_mut().insert(AuthContext {
        key,
        owner: validated.owner,
        scopes: validated.scopes,
    });

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    Ok(response)
}

/// Logs each request and feeds its duration to the health monitor and profiler.
pub async fn instrumentation_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = client_origin(&request);
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    info!(
        target: "codegate::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status();

    state.health.record_request(&route, elapsed, status.as_u16() < 400);
    if let Some(ErrorKind(kind)) = response.extensions().get::<ErrorKind>() {
        state.health.record_error(kind, &route);
    }
    state.profiler.record(&format!("{} {}", method, route), elapsed);

    info!(
        target: "codegate::middleware",
        method = %method,
        uri = %uri,
        status = %status,
        elapsed_ms = elapsed.as_millis() as u64,
        "Request completed"
    );

    response
}
