//! Status endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub especies_disponibles: usize,
    pub modelo_cargado: bool,
}

#[derive(Serialize)]
pub struct TestResponse {
    pub status: String,
    pub message: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// GET / - Model and registry status
pub async fn status(State(state): State<SharedState>) -> Json<StatusResponse> {
    let loaded = state.predictor.is_model_loaded();

    Json(StatusResponse {
        status: if loaded { "ok" } else { "model not loaded" }.to_string(),
        especies_disponibles: state.predictor.species_count(),
        modelo_cargado: loaded,
    })
}

/// GET /test - Connectivity check
pub async fn test(State(state): State<SharedState>) -> Json<TestResponse> {
    Json(TestResponse {
        status: "ok".to_string(),
        message: "Species classification API is running".to_string(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
