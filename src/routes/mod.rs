pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::state::SharedState;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/api/queue", post(queue::enqueue))
        .route("/api/queue/process", post(queue::process))
        .route("/api/queue/status", get(queue::status))
        .route(
            "/api/queue/{id}",
            get(queue::get).delete(queue::purge),
        )
}
