use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::error::DungeonError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<DungeonError>() {
            Some(
                DungeonError::AgentNotFound(_)
                | DungeonError::AgentIdNotFound(_)
                | DungeonError::LlmRequestNotFound(_),
            ) => ApiError::NotFound(err.to_string()),
            Some(DungeonError::AgentExists(_)) => ApiError::Conflict(err.to_string()),
            Some(
                DungeonError::InvalidInput(_)
                | DungeonError::InvalidStatus(_)
                | DungeonError::World(_),
            ) => ApiError::BadRequest(err.to_string()),
            _ => {
                log::error!("API request failed: {:#}", err);
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
