use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ShadowDelta, ShadowState},
};
use tracing::{info, warn};

use super::DisplayAccepted;
use crate::app_state::{AppState, LoopbackControl};

type Failure = (StatusCode, Json<ApiError>);

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ShadowView {
    pub(crate) phase: String,
    pub(crate) reported: ShadowState,
    pub(crate) refresh_pending: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BrokerMessageBody {
    pub(crate) topic: String,
    pub(crate) payload: Value,
}

// Stand-ins for the cloud side of the shadow: the desired-state writer and the producers.
pub(crate) fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/shadow", get(shadow))
        .route("/shadow/desired", post(desired))
        .route("/broker/messages", get(published).post(inject))
}

fn loopback(state: &AppState) -> Result<&LoopbackControl, Failure> {
    state.loopback.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(
                ErrorCode::Unavailable,
                "shadow sync is only served with the loopback broker",
            )),
        )
    })
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Failure> {
    serde_json::from_slice(body).map_err(|error| {
        warn!(%error, "rejecting loopback request");
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(ErrorCode::Validation, error.to_string())),
        )
    })
}

fn internal(error: impl std::fmt::Display) -> Failure {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError::new(ErrorCode::Internal, error.to_string())),
    )
}

fn accepted() -> (StatusCode, Json<DisplayAccepted>) {
    (
        StatusCode::ACCEPTED,
        Json(DisplayAccepted {
            status: "ok".into(),
        }),
    )
}

async fn shadow(State(state): State<Arc<AppState>>) -> Result<Json<ShadowView>, Failure> {
    let driver = &loopback(&state)?.driver;
    Ok(Json(ShadowView {
        phase: format!("{:?}", driver.phase().await),
        reported: driver.shadow().await,
        refresh_pending: driver.has_pending_refresh().await,
    }))
}

async fn desired(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<DisplayAccepted>), Failure> {
    let control = loopback(&state)?;
    let delta: ShadowDelta = parse(&body)?;
    info!(stage = ?delta.stage, "desired shadow change over http");
    control.broker.set_desired(delta).map_err(internal)?;
    Ok(accepted())
}

async fn inject(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<DisplayAccepted>), Failure> {
    let control = loopback(&state)?;
    let message: BrokerMessageBody = parse(&body)?;
    let payload = serde_json::to_vec(&message.payload).map_err(internal)?;
    info!(topic = %message.topic, "injecting broker message over http");
    control.broker.inject(&message.topic, payload);
    Ok(accepted())
}

async fn published(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BrokerMessageBody>>, Failure> {
    let control = loopback(&state)?;
    Ok(Json(
        control
            .broker
            .published()
            .into_iter()
            .map(|message| BrokerMessageBody {
                payload: serde_json::from_slice(&message.payload).unwrap_or_else(|_| {
                    Value::String(String::from_utf8_lossy(&message.payload).into_owned())
                }),
                topic: message.topic,
            })
            .collect(),
    ))
}

#[cfg(test)]
#[path = "tests/loopback_tests.rs"]
mod tests;
