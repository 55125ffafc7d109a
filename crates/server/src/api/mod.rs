use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Event, EventContext, EventSource},
    error::ApiError,
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{info, warn};

use crate::app_state::AppState;

mod loopback;

pub(crate) const MAX_EVENT_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct DisplayAccepted {
    pub(crate) status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StatusResponse {
    pub(crate) active_stage: Option<String>,
    pub(crate) stages: Vec<String>,
}

pub(crate) fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/display", post(display))
        .merge(loopback::routes())
        .layer(RequestBodyLimitLayer::new(MAX_EVENT_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        active_stage: state.controller.active_stage_name().await,
        stages: state.controller.registry().names(),
    })
}

async fn display(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<DisplayAccepted>, (StatusCode, Json<ApiError>)> {
    let event = Event::from_json(&body).map_err(|error| {
        warn!(%error, "rejecting display event");
        (StatusCode::BAD_REQUEST, Json(ApiError::from(error)))
    })?;

    info!(stage = %event.stage, "display event over http");
    state
        .controller
        .dispatch(&event, &EventContext::new(EventSource::Http))
        .await;

    Ok(Json(DisplayAccepted {
        status: "ok".into(),
    }))
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
