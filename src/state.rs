use std::sync::Arc;

use crate::config::Config;
use crate::queue::ActionQueue;
use crate::rate_limit::AdmissionRateLimiter;
use crate::replay::ReplayDriver;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub queue: Arc<ActionQueue>,
    pub replay: ReplayDriver,
    pub admission_limiter: AdmissionRateLimiter,
}
