mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{Behaviour, MockDispatcher};
use waitlist_relay::config::QueueConfig;
use waitlist_relay::models::ActionStatus;
use waitlist_relay::queue::dedup::DedupRules;
use waitlist_relay::queue::ActionQueue;
use waitlist_relay::replay::{ReplayDriver, Selector};

fn setup(max_attempts: u32, behaviour: Behaviour) -> (Arc<ActionQueue>, Arc<MockDispatcher>, ReplayDriver) {
    let queue = Arc::new(ActionQueue::new(
        QueueConfig {
            max_attempts,
            ..QueueConfig::default()
        },
        DedupRules::new(),
    ));
    let dispatcher = MockDispatcher::new(behaviour);
    let driver = ReplayDriver::new(queue.clone(), dispatcher.clone(), Duration::from_millis(100));
    (queue, dispatcher, driver)
}

fn like(queue: &ActionQueue, post: &str) -> uuid::Uuid {
    queue
        .admit(common::new_action("post-like", "/api/like", json!({ "postId": post })))
        .unwrap()
        .action
        .id
}

#[tokio::test]
async fn success_completes_and_is_not_replayed() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::Status(201));
    let id = like(&queue, "p1");

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(queue.get(id).unwrap().status, ActionStatus::Completed);

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!(summary.processed, 0);
    let summary = driver.process(&Selector::Ids(vec![id])).await;
    assert_eq!(summary.processed, 0);
    assert_eq!(dispatcher.call_count(), 1);
}

#[tokio::test]
async fn dispatch_order_is_oldest_first() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::Status(200));
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();

    let newer = queue
        .admit_at(common::new_action("post-like", "/api/like/b", json!({ "postId": "b" })), base + chrono::Duration::seconds(30))
        .unwrap()
        .action
        .id;
    let older = queue
        .admit_at(common::new_action("post-like", "/api/like/a", json!({ "postId": "a" })), base)
        .unwrap()
        .action
        .id;

    // Order of the id list does not matter
    driver.process(&Selector::Ids(vec![newer, older])).await;

    let seen: Vec<_> = dispatcher.seen.lock().unwrap().iter().map(|r| r.queue_id).collect();
    assert_eq!(seen, vec![older, newer]);
}

#[tokio::test]
async fn transport_errors_retry_until_exhausted() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::TransportError);
    let id = like(&queue, "p1");

    for attempt in 1..=2 {
        let summary = driver.process(&Selector::AllPending).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retrying, 1);
        let action = queue.get(id).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, attempt);
    }

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.retrying, 0);
    assert!(!summary.errors[0].retrying);
    assert!(summary.errors[0].error.contains("connection refused"));

    let action = queue.get(id).unwrap();
    assert_eq!(action.status, ActionStatus::Failed);
    assert_eq!(action.attempts, 3);
    assert_eq!(dispatcher.call_count(), 3);
}

#[tokio::test]
async fn exhausted_action_is_never_dispatched() {
    let (queue, dispatcher, driver) = setup(1, Behaviour::Status(503));
    let id = like(&queue, "p1");

    driver.process(&Selector::AllPending).await;
    assert_eq!(queue.get(id).unwrap().status, ActionStatus::Failed);
    assert_eq!(dispatcher.call_count(), 1);

    let summary = driver.process(&Selector::Ids(vec![id])).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.errors[0].queue_id, id);
    assert!(!summary.errors[0].retrying);
    assert_eq!(dispatcher.call_count(), 1);
}

#[tokio::test]
async fn hung_dispatch_is_cut_off_by_timeout() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::Hang);
    let id = like(&queue, "p1");

    let started = Instant::now();
    let summary = driver.process(&Selector::AllPending).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(summary.failed, 1);
    assert!(summary.errors[0].error.contains("timed out"));
    assert!(summary.errors[0].retrying);

    let action = queue.get(id).unwrap();
    assert_eq!(action.status, ActionStatus::Pending);
    assert_eq!(action.attempts, 1);
    assert_eq!(dispatcher.call_count(), 1);
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let (queue, _dispatcher, driver) = setup(3, Behaviour::Status(500));
    for post in ["a", "b", "c"] {
        like(&queue, post);
    }

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.errors.len(), 3);
}

#[tokio::test]
async fn owner_selector_only_covers_owned_pending() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::Status(200));

    let mut mine = common::new_action("post-like", "/api/like", json!({ "postId": "mine" }));
    mine.owner_id = Some("user-1".to_string());
    queue.admit(mine).unwrap();
    like(&queue, "anonymous");

    let summary = driver.process(&Selector::Owner("user-1".to_string())).await;
    assert_eq!(summary.succeeded, 1);
    assert_eq!(dispatcher.call_count(), 1);
    assert_eq!(queue.stats().pending, 1);
}

#[tokio::test]
async fn empty_or_terminal_queue_yields_zero_summary() {
    let (queue, dispatcher, driver) = setup(3, Behaviour::Status(200));

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!((summary.processed, summary.succeeded, summary.failed), (0, 0, 0));

    like(&queue, "p1");
    driver.process(&Selector::AllPending).await;

    let summary = driver.process(&Selector::AllPending).await;
    assert_eq!((summary.processed, summary.succeeded, summary.failed), (0, 0, 0));
    assert_eq!(dispatcher.call_count(), 1);
}
