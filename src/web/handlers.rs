//! HTTP request handlers for the /api surface.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::docker::read_capped;
use crate::store::{new_id, Monitor, Notification, RestartPolicy};

const KNOWN_CHANNEL_KINDS: [&str; 4] = ["webhook", "dingtalk", "wechat", "discord"];

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn ok_json() -> Response {
    Json(json!({ "ok": true })).into_response()
}

/// Fill in the defaults the front-end is allowed to omit.
fn normalize_monitor(mut m: Monitor) -> Monitor {
    if m.interval_seconds <= 0 {
        m.interval_seconds = 60;
    }
    if m.timeout_seconds <= 0 {
        m.timeout_seconds = 10;
    }
    if m.logs.tail <= 0 {
        m.logs.tail = 200;
    }
    m
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

// --- Monitors ---

pub async fn list_monitors(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.get_state().monitors)
}

pub async fn create_monitor(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut m: Monitor = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if m.id.is_empty() {
        m.id = new_id();
    }
    let m = normalize_monitor(m);
    match state.store.upsert_monitor(m) {
        Ok(out) => Json(out).into_response(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn update_monitor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut m: Monitor = match serde_json::from_value(body) {
        Ok(m) => m,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err.to_string()),
    };
    m.id = id;
    let m = normalize_monitor(m);
    match state.store.upsert_monitor(m) {
        Ok(out) => Json(out).into_response(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn delete_monitor(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.store.delete_monitor(&id) {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn pause_monitor(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    set_monitor_paused(state, id, true)
}

pub async fn resume_monitor(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    set_monitor_paused(state, id, false)
}

fn set_monitor_paused(state: AppState, id: String, paused: bool) -> Response {
    let monitors = state.store.get_state().monitors;
    let Some(mut m) = monitors.into_iter().find(|m| m.id == id) else {
        return error_json(StatusCode::NOT_FOUND, "monitor not found");
    };
    m.is_paused = paused;
    match state.store.upsert_monitor(m) {
        Ok(out) => Json(out).into_response(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn monitor_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    Json(state.engine.get_history(&id).await)
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "status": state.engine.status_snapshot().await }))
}

// --- Notifications ---

pub async fn list_notifications(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.get_notifications())
}

pub async fn create_notification(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut n: Notification = match serde_json::from_value(body) {
        Ok(n) => n,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if n.id.is_empty() {
        n.id = new_id();
    }
    if let Err(resp) = validate_notification(&mut n) {
        return resp;
    }
    match state.store.upsert_notification(n) {
        Ok(out) => Json(out).into_response(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn update_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let mut n: Notification = match serde_json::from_value(body) {
        Ok(n) => n,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err.to_string()),
    };
    n.id = id;
    if let Err(resp) = validate_notification(&mut n) {
        return resp;
    }
    match state.store.upsert_notification(n) {
        Ok(out) => Json(out).into_response(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn validate_notification(n: &mut Notification) -> Result<(), Response> {
    if n.kind.is_empty() {
        n.kind = "webhook".to_string();
    }
    if !KNOWN_CHANNEL_KINDS.contains(&n.kind.as_str()) {
        return Err(error_json(StatusCode::BAD_REQUEST, "invalid notification type"));
    }
    Ok(())
}

pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_notification(&id) {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

// --- Containers ---

pub async fn list_containers(State(state): State<AppState>) -> Response {
    match state.docker.list_containers().await {
        Ok(containers) => Json(containers).into_response(),
        Err(err) => error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    tail: Option<i64>,
    #[serde(rename = "sinceSeconds")]
    since_seconds: Option<i64>,
}

pub async fn container_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let tail = query.tail.unwrap_or(200);
    let since_seconds = query.since_seconds.unwrap_or(3600);
    let since = Utc::now() - chrono::Duration::seconds(since_seconds);

    let stream = match state.docker.logs(&id, tail, since).await {
        Ok(stream) => stream,
        Err(err) => return error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    };
    let (bytes, _truncated) = read_capped(stream, state.config.max_docker_log_bytes).await;

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        bytes,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct LifecycleBody {
    #[serde(rename = "timeoutSeconds", default)]
    timeout_seconds: i64,
}

pub async fn start_container(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.docker.start(&id).await {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub async fn stop_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleBody>>,
) -> Response {
    let timeout = lifecycle_timeout(body);
    match state.docker.stop(&id, timeout).await {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

pub async fn restart_container(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<LifecycleBody>>,
) -> Response {
    let timeout = lifecycle_timeout(body);
    match state.docker.restart(&id, timeout).await {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}

fn lifecycle_timeout(body: Option<Json<LifecycleBody>>) -> Duration {
    let secs = body.map(|Json(b)| b.timeout_seconds).unwrap_or(0);
    Duration::from_secs(secs.max(1) as u64)
}

pub async fn update_restart_policy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let policy: RestartPolicy = match serde_json::from_value(body) {
        Ok(p) => p,
        Err(err) => return error_json(StatusCode::BAD_REQUEST, err.to_string()),
    };
    match state.docker.update_restart_policy(&id, &policy).await {
        Ok(()) => ok_json(),
        Err(err) => error_json(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
    }
}
