//! Event ingestion handler (`TrackEvent`, spec.md §4.3).

use std::time::Instant;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", post(track_event))
}

#[derive(Debug, Deserialize)]
pub struct TrackEventRequest {
    pub project_id: Uuid,
    pub event_name: String,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub data: Value,
}

/// POST /api/v1/events - append an event and route it to triggered/waiting executions.
pub async fn track_event(
    State(state): State<AppState>,
    Json(body): Json<TrackEventRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let outcome = state
        .event_router
        .track_event(body.project_id, &body.event_name, body.contact_id, body.data)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({
            "triggered": outcome.triggered.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "resumed": outcome.resumed,
        }),
        request_id,
        elapsed,
    );
    Ok(Json(resp))
}
