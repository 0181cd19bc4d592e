//! Workflow definition and execution handlers.
//!
//! Mutations here are operator/job-worker facing (spec.md §1): there is no
//! authentication layer, this surface is not a public product API.

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use engine_core::repository::workflow::WorkflowRepository;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::http::error::ApiError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", post(create_workflow))
        .route("/workflows", get(list_workflows))
        .route("/workflows/{id}", get(get_workflow))
        .route("/workflows/{id}", put(update_workflow))
        .route("/workflows/{id}", delete(delete_workflow))
        .route("/workflows/{id}/trigger", post(trigger_workflow))
        .route("/workflows/{id}/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
}

#[derive(Debug, Deserialize)]
pub struct ProjectQuery {
    pub project_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListExecutionsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct TriggerWorkflowRequest {
    pub contact_id: Uuid,
    #[serde(default)]
    pub context: Value,
}

/// POST /api/v1/workflows - create or replace a workflow definition.
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<engine_types::workflow::WorkflowDefinition>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    body.validate().map_err(|e| ApiError::Validation(e.to_string()))?;
    state.workflows.save_definition(&body).await?;
    state.event_router.invalidate_workflow_cache(body.project_id);

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&body).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", body.id));
    Ok(Json(resp))
}

/// GET /api/v1/workflows?project_id=... - list workflow definitions for a project.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ProjectQuery>,
) -> Result<Json<ApiResponse<Vec<Value>>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let defs = state.workflows.list_definitions(&query.project_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let defs_json: Vec<Value> = defs.iter().map(|d| serde_json::to_value(d).unwrap()).collect();
    let resp = ApiResponse::success(defs_json, request_id, elapsed).with_link("self", "/api/v1/workflows");
    Ok(Json(resp))
}

/// GET /api/v1/workflows/:id - fetch a workflow definition.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let def = state
        .workflows
        .get_definition(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("workflow {id}")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&def).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", def.id))
        .with_link("executions", &format!("/api/v1/workflows/{}/executions", def.id));
    Ok(Json(resp))
}

/// PUT /api/v1/workflows/:id - update a workflow definition.
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mut body): Json<engine_types::workflow::WorkflowDefinition>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    body.id = id;
    body.validate().map_err(|e| ApiError::Validation(e.to_string()))?;
    state.workflows.save_definition(&body).await?;
    state.event_router.invalidate_workflow_cache(body.project_id);

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::to_value(&body).unwrap(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{}", body.id));
    Ok(Json(resp))
}

/// DELETE /api/v1/workflows/:id - delete a workflow definition.
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let deleted = state.workflows.delete_definition(&id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("workflow {id}")));
    }

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(serde_json::json!({"deleted": true, "id": id.to_string()}), request_id, elapsed);
    Ok(Json(resp))
}

/// POST /api/v1/workflows/:id/trigger - manually start an execution (`StartExecution`, §4.1).
pub async fn trigger_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TriggerWorkflowRequest>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution_id = state.runtime.start_execution(id, body.contact_id, body.context).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(
        serde_json::json!({"execution_id": execution_id.to_string(), "workflow_id": id.to_string()}),
        request_id,
        elapsed,
    )
    .with_link("self", &format!("/api/v1/executions/{execution_id}"))
    .with_link("workflow", &format!("/api/v1/workflows/{id}"));
    Ok(Json(resp))
}

/// GET /api/v1/workflows/:id/executions - list executions for a workflow.
pub async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListExecutionsQuery>,
) -> Result<Json<ApiResponse<Vec<Value>>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let executions = state.workflows.list_executions(&id, query.limit).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let executions_json: Vec<Value> = executions.iter().map(|e| serde_json::to_value(e).unwrap()).collect();
    let resp = ApiResponse::success(executions_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/workflows/{id}/executions"));
    Ok(Json(resp))
}

/// GET /api/v1/executions/:id - execution detail with its step executions.
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, ApiError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let execution = state
        .workflows
        .get_execution(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("execution {id}")))?;
    let steps = state.workflows.list_step_executions(&id).await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let mut execution_json = serde_json::to_value(&execution).unwrap();
    execution_json["steps"] = serde_json::to_value(&steps).unwrap();

    let resp = ApiResponse::success(execution_json, request_id, elapsed)
        .with_link("self", &format!("/api/v1/executions/{id}"))
        .with_link("workflow", &format!("/api/v1/workflows/{}", execution.workflow_id));
    Ok(Json(resp))
}
