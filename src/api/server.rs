use anyhow::Result;
use axum::{
    routing::{get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::handlers;
use crate::service::DungeonService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DungeonService>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/agents", get(handlers::list_agents))
        .route("/agents", post(handlers::register_agent))
        .route("/agents/:name", get(handlers::get_agent))
        .route("/agents/:name/commands", post(handlers::enqueue_command))
        .route("/agents/:name/running", post(handlers::set_running))
        .route("/agents/:name/reset", post(handlers::reset_agent))
        .route("/agents/:name/prompt", put(handlers::update_prompt))
        .route("/agents/:name/llm-response", post(handlers::submit_llm_response))
        .route("/llm-requests/:id", patch(handlers::update_llm_request))
        .route("/perceptions", get(handlers::perception_log))
        .layer(CorsLayer::permissive())
        .with_state(state.service)
}

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    log::info!("Dungeon API listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}
