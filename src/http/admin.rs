//! `/admin/*` handlers (spec §4.9, §6): config read/write, the dashboard
//! aggregation, and the five operator actions. Every route here requires
//! the admin secret, supplied as a bearer token or an `?auth=` query
//! parameter.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use super::response::{bad_request, internal_error, unauthorized, HttpResult};
use crate::admin::{self, AdminAction};
use crate::config::ConfigPatch;
use crate::middleware::bearer_or_query_auth;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    auth: Option<String>,
}

fn require_admin(app: &AppState, headers: &HeaderMap, auth: &AuthQuery) -> HttpResult<()> {
    if bearer_or_query_auth(headers, auth.auth.as_deref(), &app.admin_secret) {
        Ok(())
    } else {
        Err(unauthorized("admin secret required"))
    }
}

pub async fn get_config(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
) -> HttpResult<impl IntoResponse> {
    require_admin(&app, &headers, &auth)?;
    Ok(Json(app.config.get()))
}

pub async fn put_config(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
    Json(patch): Json<ConfigPatch>,
) -> HttpResult<impl IntoResponse> {
    require_admin(&app, &headers, &auth)?;
    let updated = app.config.update(patch).map_err(internal_error)?;
    Ok(Json(updated))
}

pub async fn dashboard(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
) -> HttpResult<impl IntoResponse> {
    require_admin(&app, &headers, &auth)?;
    let view = admin::dashboard(&app).await.map_err(internal_error)?;
    Ok(Json(view))
}

/// Wire shape of `POST /admin/actions` (spec §6): `{action, params?}`, not a
/// Rust-shaped internally-tagged enum — `params` is a free-form object whose
/// fields depend on `action`.
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    action: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, serde::Serialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

fn parse_action(req: &ActionRequest) -> HttpResult<AdminAction> {
    match req.action.as_str() {
        "reconnect_feed" => {
            let feed = req
                .params
                .get("feed")
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad_request("reconnect_feed requires params.feed"))?
                .to_owned();
            Ok(AdminAction::ReconnectFeed { feed })
        }
        "clear_old_events" => {
            let days_old = req.params.get("daysOld").and_then(serde_json::Value::as_u64).map(|v| v as u32);
            Ok(AdminAction::ClearOldEvents { days_old })
        }
        "reset_ratelimit" => {
            let ip = req
                .params
                .get("ip")
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad_request("reset_ratelimit requires params.ip"))?
                .to_owned();
            Ok(AdminAction::ResetRateLimit { ip })
        }
        "trigger_rollup" => Ok(AdminAction::TriggerRollup),
        "cleanup_now" => Ok(AdminAction::CleanupNow),
        other => Err(bad_request(format!("unknown admin action \"{other}\""))),
    }
}

pub async fn actions(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(auth): Query<AuthQuery>,
    Json(body): Json<ActionRequest>,
) -> HttpResult<impl IntoResponse> {
    require_admin(&app, &headers, &auth)?;
    let action = parse_action(&body)?;
    let action_name = body.action.clone();
    let result = admin::apply_admin_action(&app, action).await.map_err(internal_error)?;
    Ok(Json(ActionResponse {
        success: true,
        message: format!("{action_name} applied"),
        result: serde_json::to_value(result.detail).ok(),
    }))
}
