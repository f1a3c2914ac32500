pub mod queued_action;

pub use queued_action::{ActionStatus, ActionView, Method, QueueStats, QueuedAction};
