pub mod dedup;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use axum::http::{HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::models::{ActionStatus, Method, QueueStats, QueuedAction};

use dedup::{DedupInput, DedupRules};

/// An intent submitted for later replay.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub action_kind: String,
    pub target_path: String,
    pub method: Method,
    pub payload: serde_json::Value,
    pub headers: Option<BTreeMap<String, String>>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Admission {
    pub action: QueuedAction,
    /// True when an equivalent in-flight action was returned instead of a new one.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitError {
    EmptyField(&'static str),
    MissingPayload,
    InvalidTargetPath(String),
    InvalidHeader(String),
}

impl std::fmt::Display for AdmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdmitError::EmptyField(field) => write!(f, "{field} is required"),
            AdmitError::MissingPayload => write!(f, "body is required"),
            AdmitError::InvalidTargetPath(path) => {
                write!(f, "targetPath must be a relative path starting with '/': {path}")
            }
            AdmitError::InvalidHeader(name) => write!(f, "invalid header: {name:?}"),
        }
    }
}

/// Bounded in-memory store of queued actions.
///
/// All reads and writes go through this type; records are handed out as
/// clones so nothing outside can mutate queue state directly.
pub struct ActionQueue {
    inner: Mutex<Inner>,
    config: QueueConfig,
    dedup_rules: DedupRules,
}

#[derive(Default)]
struct Inner {
    actions: HashMap<Uuid, QueuedAction>,
    /// Dedup key -> id of the pending or processing action holding it.
    in_flight: HashMap<String, Uuid>,
    next_seq: u64,
}

impl Inner {
    fn release_key(&mut self, action: &QueuedAction) {
        if self.in_flight.get(&action.dedup_key) == Some(&action.id) {
            self.in_flight.remove(&action.dedup_key);
        }
    }

    fn remove(&mut self, id: Uuid) -> Option<QueuedAction> {
        let action = self.actions.remove(&id)?;
        self.release_key(&action);
        Some(action)
    }

    fn oldest_where(&self, limit: usize, pred: impl Fn(&QueuedAction) -> bool) -> Vec<Uuid> {
        let mut matching: Vec<&QueuedAction> = self.actions.values().filter(|a| pred(*a)).collect();
        matching.sort_by_key(|a| (a.submitted_at, a.seq));
        matching.into_iter().take(limit).map(|a| a.id).collect()
    }

    fn make_room(&mut self, batch: usize) -> usize {
        let mut victims = self.oldest_where(batch, |a| a.status == ActionStatus::Pending);
        if victims.is_empty() {
            victims = self.oldest_where(batch, |a| a.status.is_terminal());
        }
        for id in &victims {
            self.remove(*id);
        }
        victims.len()
    }
}

impl ActionQueue {
    pub fn new(config: QueueConfig, dedup_rules: DedupRules) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            config,
            dedup_rules,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    pub fn status_limit(&self) -> usize {
        self.config.status_limit
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn admit(&self, new: NewAction) -> Result<Admission, AdmitError> {
        self.admit_at(new, Utc::now())
    }

    /// Admit with an explicit admission time.
    pub fn admit_at(&self, new: NewAction, now: DateTime<Utc>) -> Result<Admission, AdmitError> {
        let action_kind = new.action_kind.trim();
        if action_kind.is_empty() {
            return Err(AdmitError::EmptyField("actionKind"));
        }
        let target_path = new.target_path.trim();
        if target_path.is_empty() {
            return Err(AdmitError::EmptyField("targetPath"));
        }
        if !target_path.starts_with('/') || target_path.starts_with("//") {
            return Err(AdmitError::InvalidTargetPath(target_path.to_string()));
        }
        if new.payload.is_null() {
            return Err(AdmitError::MissingPayload);
        }
        // Anything the dispatcher could not put on the wire is rejected here.
        for (name, value) in new.headers.iter().flatten() {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(AdmitError::InvalidHeader(name.clone()));
            }
        }
        let owner_id = new
            .owner_id
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty());

        let dedup_key = self.dedup_rules.key(&DedupInput {
            action_kind,
            target_path,
            method: new.method,
            payload: &new.payload,
            owner_id: owner_id.as_deref(),
            submitted_at: now,
        });

        let mut inner = self.lock();

        if let Some(existing) = inner
            .in_flight
            .get(&dedup_key)
            .and_then(|id| inner.actions.get(id))
        {
            tracing::debug!("Deduplicated {action_kind} admission onto {}", existing.id);
            return Ok(Admission {
                action: existing.clone(),
                duplicate: true,
            });
        }

        if inner.actions.len() >= self.config.capacity {
            let evicted = inner.make_room(self.config.evict_batch);
            tracing::warn!(
                "Action queue at capacity ({}), evicted {evicted} oldest entries",
                self.config.capacity
            );
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let action = QueuedAction {
            id: Uuid::now_v7(),
            action_kind: action_kind.to_string(),
            target_path: target_path.to_string(),
            method: new.method,
            payload: new.payload,
            headers: new.headers,
            owner_id,
            submitted_at: now,
            attempts: 0,
            status: ActionStatus::Pending,
            last_error: None,
            dedup_key,
            seq,
        };

        inner.in_flight.insert(action.dedup_key.clone(), action.id);
        inner.actions.insert(action.id, action.clone());

        tracing::debug!("Queued {} action {}", action.action_kind, action.id);

        Ok(Admission {
            action,
            duplicate: false,
        })
    }

    /// Apply a status change. Returns false when the move is not allowed.
    ///
    /// Moving into `processing` with the attempt budget spent finalizes the
    /// action as `failed` and is refused. Moving into `failed` with budget left
    /// re-arms the action as `pending`.
    pub fn transition(&self, id: Uuid, to: ActionStatus, error: Option<&str>) -> bool {
        let max_attempts = self.config.max_attempts;
        let mut inner = self.lock();

        let Some(action) = inner.actions.get_mut(&id) else {
            return false;
        };

        match (action.status, to) {
            (ActionStatus::Pending | ActionStatus::Failed, ActionStatus::Processing)
                if action.attempts >= max_attempts =>
            {
                action.status = ActionStatus::Failed;
                if action.last_error.is_none() {
                    action.last_error = Some(format!("Maximum attempts ({max_attempts}) exceeded"));
                }
                let action = action.clone();
                inner.release_key(&action);
                false
            }
            (ActionStatus::Pending, ActionStatus::Processing) => {
                action.status = ActionStatus::Processing;
                action.attempts += 1;
                true
            }
            (ActionStatus::Processing, ActionStatus::Completed) => {
                action.status = ActionStatus::Completed;
                let action = action.clone();
                inner.release_key(&action);
                true
            }
            (ActionStatus::Processing, ActionStatus::Failed) => {
                action.last_error = Some(error.unwrap_or("Unknown error").to_string());
                if action.attempts < max_attempts {
                    action.status = ActionStatus::Pending;
                } else {
                    action.status = ActionStatus::Failed;
                    let action = action.clone();
                    inner.release_key(&action);
                }
                true
            }
            (ActionStatus::Processing, ActionStatus::Pending) => {
                action.status = ActionStatus::Pending;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<QueuedAction> {
        self.lock().actions.get(&id).cloned()
    }

    /// Every action submitted by `owner_id`, oldest first.
    pub fn by_owner(&self, owner_id: &str) -> Vec<QueuedAction> {
        let inner = self.lock();
        let ids = inner.oldest_where(usize::MAX, |a| a.owner_id.as_deref() == Some(owner_id));
        ids.iter().filter_map(|id| inner.actions.get(id).cloned()).collect()
    }

    /// Pending actions, oldest first.
    pub fn pending(&self) -> Vec<QueuedAction> {
        let inner = self.lock();
        let ids = inner.oldest_where(usize::MAX, |a| a.status == ActionStatus::Pending);
        ids.iter().filter_map(|id| inner.actions.get(id).cloned()).collect()
    }

    /// Pending actions submitted by `owner_id`, oldest first.
    pub fn pending_for_owner(&self, owner_id: &str) -> Vec<QueuedAction> {
        let inner = self.lock();
        let ids = inner.oldest_where(usize::MAX, |a| {
            a.status == ActionStatus::Pending && a.owner_id.as_deref() == Some(owner_id)
        });
        ids.iter().filter_map(|id| inner.actions.get(id).cloned()).collect()
    }

    /// Ids of terminal actions submitted before `cutoff`.
    pub fn terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<Uuid> {
        self.lock()
            .actions
            .values()
            .filter(|a| a.status.is_terminal() && a.submitted_at < cutoff)
            .map(|a| a.id)
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        let mut stats = QueueStats {
            total: inner.actions.len(),
            capacity: self.config.capacity,
            ..QueueStats::default()
        };
        for action in inner.actions.values() {
            match action.status {
                ActionStatus::Pending => stats.pending += 1,
                ActionStatus::Processing => stats.processing += 1,
                ActionStatus::Completed => stats.completed += 1,
                ActionStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove an action regardless of its status.
    pub fn purge(&self, id: Uuid) -> Option<QueuedAction> {
        self.lock().remove(id)
    }
}
