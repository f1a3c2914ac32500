pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Method, QueuedAction};

/// A replayed call against an internal handler.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub queue_id: Uuid,
    pub method: Method,
    pub target_path: String,
    pub payload: serde_json::Value,
    pub headers: BTreeMap<String, String>,
}

impl From<&QueuedAction> for DispatchRequest {
    fn from(action: &QueuedAction) -> Self {
        Self {
            queue_id: action.id,
            method: action.method,
            target_path: action.target_path.clone(),
            payload: action.payload.clone(),
            headers: action.headers.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status_code: u16,
    pub body: String,
}

impl DispatchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Timeout(u64),
    Transport(String),
    InvalidRequest(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Timeout(ms) => write!(f, "Dispatch timed out after {ms}ms"),
            DispatchError::Transport(msg) => write!(f, "Dispatch failed: {msg}"),
            DispatchError::InvalidRequest(msg) => write!(f, "Invalid dispatch request: {msg}"),
        }
    }
}

/// Performs the actual handler invocation for a replayed action.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, req: &DispatchRequest) -> Result<DispatchResponse, DispatchError>;
}
