//! HTTP control plane.
//!
//! | Method | Path       | Purpose                                        |
//! |--------|------------|------------------------------------------------|
//! | GET    | `/`        | Dashboard                                      |
//! | POST   | `/start`   | Start a run, returns once the reader is spawned |
//! | GET    | `/stop`    | Two-phase stop, returns once everything drained |
//! | GET    | `/metrics` | Uptime, GB committed and throughput            |
//! | GET    | `/status`  | Phase, outcome and counters of the last run    |
//! | GET    | `/health`  | Liveness                                       |

mod dashboard;
pub mod handler;

use crate::server::engine::RunController;
use axum::{
    Router,
    routing::{get, post},
};
use logfan_core::RunDefaults;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Clone)]
pub struct AppState {
    pub controller: RunController,
    pub defaults: Arc<RunDefaults>,
}

pub fn router(controller: RunController, defaults: RunDefaults) -> Router {
    let state = AppState {
        controller,
        defaults: Arc::new(defaults),
    };

    Router::new()
        .route("/", get(handler::dashboard))
        .route("/start", post(handler::start))
        .route("/stop", get(handler::stop))
        .route("/metrics", get(handler::metrics))
        .route("/status", get(handler::status))
        .route("/health", get(handler::health))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
