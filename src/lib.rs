pub mod config;
pub mod error;
pub mod state;
pub mod models;
pub mod queue;
pub mod dispatch;
pub mod replay;
pub mod gc;
pub mod routes;
pub mod client_ip;
pub mod rate_limit;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::gc::GarbageCollector;
use crate::queue::ActionQueue;
use crate::rate_limit::AdmissionRateLimiter;
use crate::replay::ReplayDriver;
use crate::state::{AppState, SharedState};

pub fn build_app(config: Config, dispatcher: Arc<dyn Dispatcher>) -> (Router, SharedState) {
    let queue = Arc::new(ActionQueue::new(
        config.queue.clone(),
        config.dedup_rules.clone(),
    ));
    let replay = ReplayDriver::new(queue.clone(), dispatcher, config.dispatch.timeout);
    let admission_limiter = AdmissionRateLimiter::new(
        config.admission_rate_limit,
        config.admission_rate_window_secs,
    );

    tracing::info!(
        "Action queue ready (capacity={}, max_attempts={}, dispatch_timeout={:?})",
        config.queue.capacity,
        config.queue.max_attempts,
        config.dispatch.timeout
    );

    let cors = cors_layer(&config.cors_origins);
    let max_body_size = config.max_body_size;

    let state: SharedState = Arc::new(AppState {
        config,
        queue,
        replay,
        admission_limiter,
    });

    let app = Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state.clone());

    (app, state)
}

/// Collector bound to the app's queue, configured from `state.config.gc`.
pub fn garbage_collector(state: &SharedState) -> GarbageCollector {
    GarbageCollector::new(
        state.queue.clone(),
        state.config.gc.retention,
        state.config.gc.interval,
    )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Ignoring invalid CORS origin '{o}': {e}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE])
}

async fn health() -> &'static str {
    "ok"
}
