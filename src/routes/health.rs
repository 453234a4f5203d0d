use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "chat-service";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now(),
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
    pub version: &'static str,
    pub store: &'static str,
    pub profile_directory: &'static str,
}

pub async fn health_detailed(State(state): State<AppState>) -> Json<DetailedHealthResponse> {
    let store = match state.store.ping().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };
    let profile_directory = state.profiles.status().await;

    // The profile directory degrades gracefully, so only the store gates
    // overall health.
    let status = if store == "ok" { "ok" } else { "degraded" };

    Json(DetailedHealthResponse {
        status,
        timestamp: Utc::now(),
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        store,
        profile_directory,
    })
}
