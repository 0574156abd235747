//! `/v1/events*` handlers (spec §6): the poller's authenticated submission
//! endpoint, and the two public read endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use canaria_protocol::{Source, SubmitRequest};
use serde::Deserialize;

use super::response::{bad_request, internal_error, unauthorized, HttpResult};
use crate::state::AppState;
use crate::store::EventQuery;

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

pub async fn submit_events(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SubmitRequest>,
) -> HttpResult<impl IntoResponse> {
    let token = extract_bearer(&headers);
    if token != Some(app.poller_token.as_ref()) {
        return Err(unauthorized("invalid poller token"));
    }

    let response = app.ingest.submit(body).await.map_err(internal_error)?;
    if response.sync {
        Ok((StatusCode::OK, Json(response)).into_response())
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

pub async fn latest_event(State(app): State<Arc<AppState>>) -> HttpResult<impl IntoResponse> {
    match app.store.latest().map_err(internal_error)? {
        Some(event) => Ok((StatusCode::OK, Json(event)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    since: Option<String>,
    until: Option<String>,
    source: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<u32>,
}

pub async fn list_events(
    State(app): State<Arc<AppState>>,
    Query(q): Query<ListEventsQuery>,
) -> HttpResult<impl IntoResponse> {
    let source = match q.source {
        Some(s) => Some(s.parse::<Source>().map_err(bad_request)?),
        None => None,
    };
    let query = EventQuery { since: q.since, until: q.until, source, r#type: q.kind, limit: q.limit };
    let events = app.store.list(&query).map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "events": events })))
}
