use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::service::{AgentSnapshot, DungeonService, ResetSummary};
use crate::types::{Agent, AgentPhase, LlmRequest, LlmRequestId, LlmStatus, PerceptionEntry};

#[derive(Deserialize)]
pub struct RegisterAgentRequest {
    pub name: String,
    pub location: Option<String>,
}

#[derive(Deserialize)]
pub struct EnqueueCommandRequest {
    pub command: String,
}

#[derive(Deserialize)]
pub struct SetRunningRequest {
    pub running: bool,
}

#[derive(Deserialize)]
pub struct UpdatePromptRequest {
    pub prompt: Option<String>,
    pub perception: Option<String>,
}

#[derive(Deserialize)]
pub struct SubmitResponseRequest {
    pub response: String,
}

#[derive(Deserialize)]
pub struct UpdateLlmRequest {
    pub status: Option<String>,
    pub response: Option<String>,
}

#[derive(Deserialize)]
pub struct PerceptionQuery {
    pub agent: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub location: String,
    pub phase: AgentPhase,
    pub is_running: bool,
}

impl From<Agent> for AgentSummary {
    fn from(agent: Agent) -> Self {
        Self {
            id: agent.id.to_string(),
            name: agent.name,
            location: agent.location,
            phase: agent.phase,
            is_running: agent.is_running,
        }
    }
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: String,
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn list_agents(
    State(service): State<Arc<DungeonService>>,
) -> Result<Json<Vec<AgentSummary>>, ApiError> {
    let agents = service.storage().list_agents().await?;
    Ok(Json(agents.into_iter().map(AgentSummary::from).collect()))
}

pub async fn register_agent(
    State(service): State<Arc<DungeonService>>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<Json<AgentSummary>, ApiError> {
    let agent = service
        .register_agent(&request.name, request.location.as_deref())
        .await?;
    Ok(Json(AgentSummary::from(agent)))
}

pub async fn get_agent(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
) -> Result<Json<AgentSnapshot>, ApiError> {
    Ok(Json(service.get_agent_snapshot(&name).await?))
}

pub async fn enqueue_command(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
    Json(request): Json<EnqueueCommandRequest>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let id = service.enqueue_command(&name, &request.command).await?;
    Ok(Json(CreatedResponse { id: id.to_string() }))
}

pub async fn set_running(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
    Json(request): Json<SetRunningRequest>,
) -> Result<Json<AgentSummary>, ApiError> {
    let agent = service.set_running(&name, request.running).await?;
    Ok(Json(AgentSummary::from(agent)))
}

pub async fn reset_agent(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
) -> Result<Json<ResetSummary>, ApiError> {
    Ok(Json(service.reset(&name).await?))
}

pub async fn update_prompt(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
    Json(request): Json<UpdatePromptRequest>,
) -> Result<Json<AgentSummary>, ApiError> {
    let agent = service
        .update_prompt(&name, request.prompt, request.perception)
        .await?;
    Ok(Json(AgentSummary::from(agent)))
}

pub async fn submit_llm_response(
    State(service): State<Arc<DungeonService>>,
    Path(name): Path<String>,
    Json(request): Json<SubmitResponseRequest>,
) -> Result<Json<CreatedResponse>, ApiError> {
    let id = service.submit_llm_response(&name, &request.response).await?;
    Ok(Json(CreatedResponse { id: id.to_string() }))
}

pub async fn update_llm_request(
    State(service): State<Arc<DungeonService>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateLlmRequest>,
) -> Result<Json<LlmRequest>, ApiError> {
    let id: LlmRequestId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid request id '{}'", id)))?;
    let status = request
        .status
        .map(|s| s.parse::<LlmStatus>())
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(service.update_llm_request(id, status, request.response).await?))
}

pub async fn perception_log(
    State(service): State<Arc<DungeonService>>,
    Query(query): Query<PerceptionQuery>,
) -> Result<Json<Vec<PerceptionEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(service.perception_log(query.agent.as_deref(), limit).await?))
}
