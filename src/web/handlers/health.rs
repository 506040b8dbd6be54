use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::web::state::AppState;

const PING_KEY: &str = "health:ping";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub time: String,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub db: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_error: Option<String>,
    pub cache: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_error: Option<String>,
}

/// Liveness probe. Always answers 200; dependency failures are reported in
/// the body.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    let now = chrono::Utc::now();

    let db_error = match state.db.query("SELECT 1").await {
        Ok(_) => None,
        Err(e) => {
            warn!("Health check: database unavailable: {}", e);
            Some(e.to_string())
        }
    };

    let token = now.timestamp_millis();
    state
        .cache
        .set(PING_KEY, json!(token), Duration::from_secs(5))
        .await;
    let cache_error = match state.cache.get(PING_KEY).await {
        Some(value) if value == json!(token) => None,
        _ => Some("cache round-trip failed".to_string()),
    };

    Json(HealthStatus {
        status: "ok",
        time: now.to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: now.signed_duration_since(state.startup_time).num_seconds(),
        db: if db_error.is_some() { "error" } else { "ok" },
        db_error,
        cache: if cache_error.is_some() { "error" } else { "ok" },
        cache_error,
    })
}
