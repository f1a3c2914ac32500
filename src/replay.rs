use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::{DispatchError, DispatchRequest, Dispatcher};
use crate::models::{ActionStatus, QueuedAction};
use crate::queue::ActionQueue;

/// Which queued actions a processing pass should cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Ids(Vec<Uuid>),
    Owner(String),
    AllPending,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySummary {
    pub processed: usize,
    pub succeeded: usize,
    /// Unsuccessful attempts, including those re-armed for retry.
    pub failed: usize,
    /// Subset of `failed` that went back to pending.
    pub retrying: usize,
    pub errors: Vec<ReplayError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplayError {
    pub queue_id: Uuid,
    pub error: String,
    pub retrying: bool,
}

enum Outcome {
    Succeeded,
    Failed { error: String, retrying: bool },
    Skipped,
}

/// Runs processing passes over the action queue.
pub struct ReplayDriver {
    queue: Arc<ActionQueue>,
    dispatcher: Arc<dyn Dispatcher>,
    timeout: Duration,
}

impl ReplayDriver {
    pub fn new(queue: Arc<ActionQueue>, dispatcher: Arc<dyn Dispatcher>, timeout: Duration) -> Self {
        Self {
            queue,
            dispatcher,
            timeout,
        }
    }

    /// Dispatch every selected action once, oldest first.
    ///
    /// A failing action never stops the pass.
    pub async fn process(&self, selector: &Selector) -> ReplaySummary {
        let batch = self.select(selector);
        let mut summary = ReplaySummary::default();

        if batch.is_empty() {
            tracing::debug!("Replay pass for {selector:?} selected nothing");
            return summary;
        }

        tracing::info!("Replay pass starting ({} actions)", batch.len());

        for action in &batch {
            match self.process_one(action).await {
                Outcome::Succeeded => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                }
                Outcome::Failed { error, retrying } => {
                    summary.processed += 1;
                    summary.failed += 1;
                    if retrying {
                        summary.retrying += 1;
                    }
                    summary.errors.push(ReplayError {
                        queue_id: action.id,
                        error,
                        retrying,
                    });
                }
                Outcome::Skipped => {}
            }
        }

        tracing::info!(
            "Replay pass finished: processed={}, succeeded={}, failed={}, retrying={}",
            summary.processed,
            summary.succeeded,
            summary.failed,
            summary.retrying
        );

        summary
    }

    fn select(&self, selector: &Selector) -> Vec<QueuedAction> {
        match selector {
            Selector::AllPending => self.queue.pending(),
            Selector::Owner(owner_id) => self.queue.pending_for_owner(owner_id),
            Selector::Ids(ids) => {
                let mut batch: Vec<QueuedAction> = Vec::with_capacity(ids.len());
                for id in ids {
                    if batch.iter().any(|a| a.id == *id) {
                        continue;
                    }
                    // Failed actions are selectable by id and reported as terminal.
                    if let Some(action) = self.queue.get(*id).filter(|a| {
                        matches!(a.status, ActionStatus::Pending | ActionStatus::Failed)
                    }) {
                        batch.push(action);
                    }
                }
                batch.sort_by_key(|a| (a.submitted_at, a.seq));
                batch
            }
        }
    }

    async fn process_one(&self, action: &QueuedAction) -> Outcome {
        if !self.queue.transition(action.id, ActionStatus::Processing, None) {
            return match self.queue.get(action.id) {
                Some(current) if current.status == ActionStatus::Failed => {
                    tracing::warn!(
                        "Action {} has no attempts left ({}), not dispatching",
                        action.id,
                        current.attempts
                    );
                    Outcome::Failed {
                        error: current
                            .last_error
                            .unwrap_or_else(|| "Maximum attempts exceeded".to_string()),
                        retrying: false,
                    }
                }
                // Claimed by a concurrent pass, completed meanwhile, or purged.
                _ => Outcome::Skipped,
            };
        }

        tracing::debug!(
            "Dispatching {} {} {} (action={}, attempt={})",
            action.action_kind,
            action.method,
            action.target_path,
            action.id,
            action.attempts + 1
        );

        let request = DispatchRequest::from(action);
        let result = tokio::time::timeout(self.timeout, self.dispatcher.dispatch(&request))
            .await
            .unwrap_or_else(|_| Err(DispatchError::Timeout(self.timeout.as_millis() as u64)));

        let error = match result {
            Ok(resp) if resp.is_success() => {
                self.queue.transition(action.id, ActionStatus::Completed, None);
                tracing::debug!("Action {} completed ({})", action.id, resp.status_code);
                return Outcome::Succeeded;
            }
            Ok(resp) if resp.body.is_empty() => format!("Handler returned {}", resp.status_code),
            Ok(resp) => format!("Handler returned {}: {}", resp.status_code, resp.body),
            Err(e) => e.to_string(),
        };

        self.queue
            .transition(action.id, ActionStatus::Failed, Some(error.as_str()));

        let retrying = self
            .queue
            .get(action.id)
            .is_some_and(|a| a.status == ActionStatus::Pending);

        tracing::warn!(
            "Action {} failed ({}): {error}",
            action.id,
            if retrying { "will retry" } else { "giving up" }
        );

        Outcome::Failed { error, retrying }
    }
}
