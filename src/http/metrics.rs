//! `GET /v1/metrics` (spec §4.5, §6): Prometheus text exposition by
//! default, or a JSON snapshot via `?format=json`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::response::{internal_error, HttpResult};
use crate::feed::ConnectorStatus;
use crate::metrics::LiveContext;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    format: Option<String>,
}

async fn live_context(app: &AppState) -> LiveContext {
    let registry = app.feeds.read().await;
    let feed_connected = registry
        .iter()
        .map(|(name, handle)| {
            let connected = handle.state.read().expect("feed state lock poisoned").status
                == Some(ConnectorStatus::Connected);
            (name.clone(), connected)
        })
        .collect();
    LiveContext {
        ws_clients: app.hub.size(),
        feed_connected,
        parser_heartbeat_age_seconds: app.ingest.heartbeat_age_seconds().await,
    }
}

pub async fn metrics(
    State(app): State<Arc<AppState>>,
    Query(q): Query<MetricsQuery>,
) -> HttpResult<impl IntoResponse> {
    let live = live_context(&app).await;
    if q.format.as_deref() == Some("json") {
        let snapshot = app.metrics.json_snapshot(live).map_err(internal_error)?;
        Ok(Json(snapshot).into_response())
    } else {
        let text = app.metrics.export_prometheus(live).map_err(internal_error)?;
        Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
    }
}
