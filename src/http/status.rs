//! `/v1/status`, `/v1/health`, `/v1/connections`, `/v1/monitoring` (spec §6).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::admin;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum StatusLevel {
    Ok,
    Degraded,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: StatusLevel,
    summary: String,
    timestamp: String,
}

pub async fn status(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    let health = admin::health_check(&app).await;
    let (status, summary) = if health.healthy {
        (StatusLevel::Ok, "all subsystems nominal".to_owned())
    } else {
        let mut failing = Vec::new();
        if !health.parser {
            failing.push("parser");
        }
        if !health.feeds {
            failing.push("feeds");
        }
        if !health.database {
            failing.push("database");
        }
        (StatusLevel::Degraded, format!("degraded: {}", failing.join(", ")))
    };
    Json(StatusResponse { status, summary, timestamp: chrono::Utc::now().to_rfc3339() })
}

pub async fn health(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    let health = admin::health_check(&app).await;
    let code = if health.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(health))
}

pub async fn connections(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    Json(admin::enhanced_status(&app).await)
}

pub async fn monitoring(State(app): State<Arc<AppState>>) -> impl IntoResponse {
    Json(admin::detailed_monitoring(&app).await)
}
