use super::{AppState, dashboard::DASHBOARD_HTML};
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use bytes::Bytes;
use logfan_core::{Error, RunStatus, StartRequest};

pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

/// Decodes the body by hand so a malformed request is reported as a `400`
/// with the decoder's message rather than axum's default rejection.
pub async fn start(State(state): State<AppState>, body: Bytes) -> Result<Json<RunStatus>, Error> {
    let request: StartRequest =
        serde_json::from_slice(&body).map_err(|e| Error::InvalidRequest {
            reason: format!("Failed to parse request body: {e}"),
        })?;

    let config = request.resolve(&state.defaults)?;
    tracing::info!(
        "Start requested: chunk={} workers={} delay={:?} tofile={} source={}",
        config.chunk_size,
        config.workers,
        config.delay,
        config.to_file,
        config.source
    );

    match state.controller.start(config).await {
        Ok(status) => Ok(Json(status)),
        Err(e) => {
            tracing::warn!("Start rejected: {e}");
            Err(e)
        }
    }
}

pub async fn stop(State(state): State<AppState>) -> String {
    state.controller.stop().await.message()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let snapshot = state.controller.metrics();
    match serde_json::to_vec(&snapshot) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => Error::Encode {
            reason: e.to_string(),
        }
        .into_response(),
    }
}

pub async fn status(State(state): State<AppState>) -> Json<RunStatus> {
    Json(state.controller.status())
}

pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
