//! Campaign CRUD, `Send`, and `Cancel` handlers (spec.md §4.4).

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use engine_core::repository::{CampaignRepository, ContactRepository};
use engine_types::campaign::{AudienceType, Campaign, CampaignStatus};
use engine_types::contact::AudienceFilter;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/campaigns", post(create_campaign))
        .route("/campaigns", get(list_campaigns))
        .route("/campaigns/{id}", get(get_campaign))
        .route("/campaigns/{id}", put(update_campaign))
        .route("/campaigns/{id}/send", post(send_campaign))
        .route("/campaigns/{id}/cancel", post(cancel_campaign))
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub project_id: Uuid,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub from: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    pub audience_type: AudienceType,
    #[serde(default)]
    pub segment_id: Option<Uuid>,
    #[serde(default)]
    pub audience_filter: Vec<AudienceFilter>,
}

#[derive(Debug, Deserialize)]
pub struct SendCampaignRequest {
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}

/// POST /api/v1/campaigns - create a DRAFT campaign.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let campaign = Campaign {
        id: Uuid::now_v7(),
        project_id: body.project_id,
        name: body.name,
        subject: body.subject,
        body: body.body,
        from: body.from,
        reply_to: body.reply_to,
        audience_type: body.audience_type,
        segment_id: body.segment_id,
        audience_filter: body.audience_filter,
        status: CampaignStatus::Draft,
        scheduled_for: None,
        total_recipients: 0,
        sent_count: 0,
        delivered_count: 0,
        opened_count: 0,
        clicked_count: 0,
        bounced_count: 0,
        sent_at: None,
    };
    state.campaigns_repo.create_campaign(&campaign).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&campaign).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/campaigns/{}", campaign.id));
    Ok(Json(resp))
}

/// GET /api/v1/campaigns?project_id=... - list campaigns for a project.
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<ApiResponse<Vec<Value>>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let campaigns = state.campaigns_repo.list_campaigns(&query.project_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let campaigns_json: Vec<Value> = campaigns.iter().map(|c| serde_json::to_value(c).unwrap()).collect();
    let resp = ApiResponse::success(campaigns_json, request_id, elapsed).with_link("self", "/api/v1/campaigns");
    Ok(Json(resp))
}

/// GET /api/v1/campaigns/:id - fetch a campaign.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let campaign = state
        .campaigns_repo
        .get_campaign(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("campaign {id}")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&campaign).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/campaigns/{}", campaign.id));
    Ok(Json(resp))
}

/// PUT /api/v1/campaigns/:id - edit subject/body/audience.
///
/// Mutation is allowed only in DRAFT or SCHEDULED (spec.md §3).
pub async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateCampaignRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let mut campaign =
        state.campaigns_repo.get_campaign(&id).await?.ok_or_else(|| ApiError::NotFound(format!("campaign {id}")))?;
    if !campaign.status.mutable() {
        return Err(ApiError::InvalidState(format!(
            "campaign {id} cannot be edited in its current state ({:?})",
            campaign.status
        )));
    }

    campaign.name = body.name;
    campaign.subject = body.subject;
    campaign.body = body.body;
    campaign.from = body.from;
    campaign.reply_to = body.reply_to;
    campaign.audience_type = body.audience_type;
    campaign.segment_id = body.segment_id;
    campaign.audience_filter = body.audience_filter;
    state.campaigns_repo.update_campaign(&campaign).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&campaign).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/campaigns/{}", campaign.id));
    Ok(Json(resp))
}

/// POST /api/v1/campaigns/:id/send - `Send` (spec.md §4.4).
pub async fn send_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SendCampaignRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.campaigns.send(id, body.scheduled_for).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"campaign_id": id.to_string()}), request_id, elapsed)
        .with_link("self", &format!("/api/v1/campaigns/{id}"));
    Ok(Json(resp))
}

/// POST /api/v1/campaigns/:id/cancel - `Cancel` (spec.md §4.4).
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.campaigns.cancel(id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"campaign_id": id.to_string(), "status": "cancelled"}), request_id, elapsed)
        .with_link("self", &format!("/api/v1/campaigns/{id}"));
    Ok(Json(resp))
}
