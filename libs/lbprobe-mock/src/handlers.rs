// HTTP route handlers for the mock load-balancer API

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::{MockState, PoolUpdate};

#[derive(Debug, Deserialize)]
pub struct CredentialsBody {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session_token: String,
}

#[derive(Debug, Deserialize)]
pub struct LogoutBody {
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct PoolResponse {
    pub name: String,
    pub enabled: bool,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into()
        })),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// POST /register - Create an account (409 if it already exists)
pub async fn register(
    State(state): State<Arc<MockState>>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    state.record("register");
    state.delay().await;

    if state.register(&body.username, &body.password) {
        info!(username = %body.username, "User registered");
        (StatusCode::OK, Json(serde_json::json!({ "username": body.username }))).into_response()
    } else {
        error_body(StatusCode::CONFLICT, "user already exists")
    }
}

/// POST /login - Issue a session token
pub async fn login(
    State(state): State<Arc<MockState>>,
    Json(body): Json<CredentialsBody>,
) -> Response {
    state.record("login");
    state.delay().await;

    match state.login(&body.username, &body.password) {
        Some(session_token) => {
            debug!(username = %body.username, "Session opened");
            (StatusCode::OK, Json(LoginResponse { session_token })).into_response()
        }
        None => error_body(StatusCode::UNAUTHORIZED, "invalid credentials"),
    }
}

/// POST /logout - Release a session; unknown tokens are accepted too
pub async fn logout(
    State(state): State<Arc<MockState>>,
    Json(body): Json<LogoutBody>,
) -> Response {
    state.record("logout");
    state.delay().await;

    state.logout(&body.session_token);
    (StatusCode::OK, Json(serde_json::json!({ "logged_out": true }))).into_response()
}

async fn update_pool(
    state: &MockState,
    route: &'static str,
    name: String,
    headers: &HeaderMap,
    enabled: bool,
) -> Response {
    state.record(route);
    state.delay().await;

    let authorized = bearer_token(headers).is_some_and(|token| state.is_live(token));
    if !authorized {
        return error_body(StatusCode::UNAUTHORIZED, "missing or expired session");
    }

    match state.set_pool(&name, enabled) {
        PoolUpdate::Applied => {
            info!(pool = %name, enabled, "Pool updated");
            (StatusCode::OK, Json(PoolResponse { name, enabled })).into_response()
        }
        PoolUpdate::Unknown => error_body(StatusCode::NOT_FOUND, format!("pool '{}' not found", name)),
        PoolUpdate::Forced(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_body(status, format!("scripted failure for pool '{}'", name))
        }
    }
}

/// POST /pools/{name}/enable
pub async fn enable_pool(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    update_pool(&state, "enable", name, &headers, true).await
}

/// POST /pools/{name}/disable
pub async fn disable_pool(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    update_pool(&state, "disable", name, &headers, false).await
}

/// GET /pools/{name} - Current pool state
pub async fn get_pool(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record("read");
    state.delay().await;

    let authorized = bearer_token(&headers).is_some_and(|token| state.is_live(token));
    if !authorized {
        return error_body(StatusCode::UNAUTHORIZED, "missing or expired session");
    }

    match state.pool_enabled(&name) {
        Some(enabled) => (StatusCode::OK, Json(PoolResponse { name, enabled })).into_response(),
        None => error_body(StatusCode::NOT_FOUND, format!("pool '{}' not found", name)),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
