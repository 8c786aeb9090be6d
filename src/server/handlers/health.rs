// 健康检查

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub backend: String,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "filemanager-rust".to_string(),
        backend: state.file_manager.backend_name().to_string(),
    })
}
