use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queued action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Processing => "processing",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutating verbs that may be queued for replay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("Unsupported method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedAction {
    pub id: Uuid,
    pub action_kind: String,
    pub target_path: String,
    pub method: Method,
    pub payload: serde_json::Value,
    pub headers: Option<BTreeMap<String, String>>,
    pub owner_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: ActionStatus,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub dedup_key: String,
    /// Admission order; breaks ties between equal `submitted_at` values.
    #[serde(skip)]
    pub seq: u64,
}

impl QueuedAction {
    pub fn view(&self) -> ActionView {
        ActionView {
            queue_id: self.id,
            action_kind: self.action_kind.clone(),
            target_path: self.target_path.clone(),
            method: self.method,
            owner_id: self.owner_id.clone(),
            submitted_at: self.submitted_at,
            attempts: self.attempts,
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }
}

/// Client-facing projection. Payload and headers are never echoed back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionView {
    pub queue_id: Uuid,
    pub action_kind: String,
    pub target_path: String,
    pub method: Method,
    pub owner_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: ActionStatus,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub capacity: usize,
}
