//! Activity Aggregator handlers: `GetActivities`, `GetStats`,
//! `GetRecentActivityCount` (spec.md §4.5).

use std::time::Instant;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use engine_types::activity::ActivityType;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/activities", get(get_activities))
        .route("/activities/stats", get(get_stats))
        .route("/activities/recent-count", get(get_recent_activity_count))
}

fn default_limit() -> u32 {
    50
}

fn default_window_days() -> i64 {
    30
}

#[derive(Debug, Deserialize)]
pub struct ActivitiesQuery {
    pub project_id: Uuid,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Comma-separated `ActivityType`s, e.g. `email.sent,email.opened`.
    #[serde(default)]
    pub types: Option<String>,
}

fn parse_type_filter(raw: &str) -> Vec<ActivityType> {
    raw.split(',')
        .filter_map(|s| match s.trim() {
            "event.triggered" => Some(ActivityType::EventTriggered),
            "email.sent" => Some(ActivityType::EmailSent),
            "email.delivered" => Some(ActivityType::EmailDelivered),
            "email.opened" => Some(ActivityType::EmailOpened),
            "email.clicked" => Some(ActivityType::EmailClicked),
            "email.bounced" => Some(ActivityType::EmailBounced),
            "workflow.started" => Some(ActivityType::WorkflowStarted),
            "workflow.completed" => Some(ActivityType::WorkflowCompleted),
            _ => None,
        })
        .collect()
}

/// GET /api/v1/activities - `GetActivities` (§4.5): merged, cursor-paginated
/// timeline over events, emails, and workflow executions.
pub async fn get_activities(
    State(state): State<AppState>,
    Query(query): Query<ActivitiesQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let now = Utc::now();
    let window_start = query.start_date.unwrap_or_else(|| now - chrono::Duration::days(default_window_days()));
    let window_end = query.end_date.unwrap_or(now);
    let type_filter = query.types.as_deref().map(parse_type_filter);

    let page = state
        .activity
        .get_activities(
            query.project_id,
            query.contact_id,
            window_start,
            window_end,
            query.cursor.as_deref(),
            query.limit,
            type_filter.as_deref(),
        )
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&page).unwrap(), request_id, elapsed)
        .with_link("self", "/api/v1/activities");
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub project_id: Uuid,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

/// GET /api/v1/activities/stats - `GetStats` (§4.5), cached for 300s.
pub async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let now = Utc::now();
    let window_start = query.start_date.unwrap_or_else(|| now - chrono::Duration::days(default_window_days()));
    let window_end = query.end_date.unwrap_or(now);

    let stats = state.activity.get_stats(query.project_id, query.contact_id, window_start, window_end).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let mut stats_json = serde_json::to_value(&stats).unwrap();
    stats_json["deliveryRate"] = serde_json::json!(stats.delivery_rate());
    let resp = ApiResponse::success(stats_json, request_id, elapsed).with_link("self", "/api/v1/activities/stats");
    Ok(Json(resp))
}

#[derive(Debug, Deserialize)]
pub struct RecentCountQuery {
    pub project_id: Uuid,
    #[serde(default = "default_recent_minutes")]
    pub minutes: i64,
}

fn default_recent_minutes() -> i64 {
    15
}

/// GET /api/v1/activities/recent-count - `GetRecentActivityCount` (§4.5):
/// fast polling path, trailing `minutes` window.
pub async fn get_recent_activity_count(
    State(state): State<AppState>,
    Query(query): Query<RecentCountQuery>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let count = state.activity.get_recent_activity_count(query.project_id, query.minutes * 60_000).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"count": count}), request_id, elapsed);
    Ok(Json(resp))
}
