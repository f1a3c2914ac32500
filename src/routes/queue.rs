use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::client_ip;
use crate::error::AppError;
use crate::models::{ActionStatus, ActionView, Method, QueueStats};
use crate::queue::NewAction;
use crate::replay::{ReplaySummary, Selector};
use crate::state::SharedState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub action_kind: Option<String>,
    pub target_path: Option<String>,
    pub method: Option<String>,
    pub body: Option<serde_json::Value>,
    pub headers: Option<BTreeMap<String, String>>,
    pub owner_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub queue_id: Uuid,
    pub action_kind: String,
    pub status: ActionStatus,
    pub submitted_at: DateTime<Utc>,
    pub duplicate: bool,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub ids: Option<Vec<String>>,
    pub owner_id: Option<String>,
    pub all: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusParams {
    pub owner_id: Option<String>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub stats: QueueStats,
    pub actions: Vec<ActionView>,
}

fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{field} is required")))
}

pub async fn enqueue(
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    let ip = client_ip::resolve(&headers, addr.ip(), &state.config.trusted_proxies);
    state
        .admission_limiter
        .check(ip)
        .map_err(AppError::RateLimited)?;

    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let action_kind = required(req.action_kind, "actionKind")?;
    let target_path = required(req.target_path, "targetPath")?;
    let method: Method = required(req.method, "method")?
        .parse()
        .map_err(AppError::BadRequest)?;
    let body = req
        .body
        .ok_or_else(|| AppError::BadRequest("body is required".to_string()))?;

    let admission = state.queue.admit(NewAction {
        action_kind,
        target_path,
        method,
        payload: body,
        headers: req.headers,
        owner_id: req.owner_id,
    })?;

    let status = if admission.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let action = admission.action;

    Ok((
        status,
        Json(EnqueueResponse {
            queue_id: action.id,
            action_kind: action.action_kind,
            status: action.status,
            submitted_at: action.submitted_at,
            duplicate: admission.duplicate,
        }),
    ))
}

pub async fn process(
    State(state): State<SharedState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<ReplaySummary>, AppError> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let selector = if let Some(ids) = req.ids {
        let parsed: Vec<Uuid> = ids
            .iter()
            .filter_map(|id| match id.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!("Ignoring malformed queue id in process request: {id}");
                    None
                }
            })
            .collect();
        Selector::Ids(parsed)
    } else if let Some(owner_id) = req.owner_id.filter(|o| !o.trim().is_empty()) {
        Selector::Owner(owner_id.trim().to_string())
    } else if req.all == Some(true) {
        Selector::AllPending
    } else {
        return Err(AppError::BadRequest(
            "One of ids, ownerId or all=true is required".to_string(),
        ));
    };

    Ok(Json(state.replay.process(&selector).await))
}

pub async fn status(
    State(state): State<SharedState>,
    Query(params): Query<StatusParams>,
) -> Json<StatusResponse> {
    let actions = match params.owner_id.as_deref().map(str::trim).filter(|o| !o.is_empty()) {
        Some(owner_id) => state.queue.by_owner(owner_id),
        None => {
            let mut pending = state.queue.pending();
            pending.truncate(state.queue.status_limit());
            pending
        }
    };

    Json(StatusResponse {
        stats: state.queue.stats(),
        actions: actions.iter().map(|a| a.view()).collect(),
    })
}

pub async fn get(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionView>, AppError> {
    let action = state
        .queue
        .get(id)
        .ok_or_else(|| AppError::NotFound("Queued action not found".to_string()))?;
    Ok(Json(action.view()))
}

pub async fn purge(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let action = state
        .queue
        .purge(id)
        .ok_or_else(|| AppError::NotFound("Queued action not found".to_string()))?;

    tracing::info!("Purged {} action {} ({})", action.action_kind, action.id, action.status);

    Ok(Json(json!({ "message": "Deleted" })))
}
