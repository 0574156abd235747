//! Introspection views and operator actions (spec §4.9): health, enhanced
//! status, detailed monitoring, the dashboard aggregation, and the five
//! admin actions.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;

use crate::config::Config;
use crate::error::StoreError;
use crate::feed::ConnectorStatus;
use crate::ingest::ParserErrorEntry;
use crate::state::AppState;
use crate::store::TableStats;

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub parser: bool,
    pub feeds: bool,
    pub database: bool,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDetail {
    pub feed: String,
    pub status: &'static str,
    pub session_uptime_ms: i64,
    pub total_uptime_ms: u64,
    pub reconnect_count: u64,
    pub uptime_percent_since_startup: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParserMetrics {
    pub success_rate: f64,
    pub average_delay_ms: Option<u64>,
    pub formatted_uptime: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedStatus {
    pub health: HealthStatus,
    pub feeds: Vec<FeedDetail>,
    pub parser: ParserMetrics,
    pub recent_parser_errors: Vec<ParserErrorEntryView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParserErrorEntryView {
    pub timestamp: String,
    pub error: String,
}

impl From<&ParserErrorEntry> for ParserErrorEntryView {
    fn from(e: &ParserErrorEntry) -> Self {
        ParserErrorEntryView { timestamp: e.timestamp.to_rfc3339(), error: e.error.clone() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub event_total: i64,
    pub events_by_source: Vec<(String, i64)>,
    pub five_minute_event_rate: f64,
    pub ws_client_history: Vec<(String, i64)>,
    pub rate_limit_top_ips: Vec<(String, i64)>,
    pub rate_limit_denied_total: i64,
    pub table_stats: TableStats,
    pub config: Config,
}

pub async fn health_check(app: &AppState) -> HealthStatus {
    let cfg = app.config.get();

    let parser = app
        .ingest
        .heartbeat_age_seconds()
        .await
        .is_some_and(|age| age < cfg.monitoring.parser_timeout_seconds as i64);

    let feeds_registry = app.feeds.read().await;
    let mut feeds_healthy = false;
    for handle in feeds_registry.values() {
        if handle.state.read().expect("feed state lock poisoned").status == Some(ConnectorStatus::Connected) {
            feeds_healthy = true;
            break;
        }
    }

    let database = app.store.count().is_ok();

    HealthStatus { parser, feeds: feeds_healthy, database, healthy: parser && feeds_healthy && database }
}

pub async fn enhanced_status(app: &AppState) -> EnhancedStatus {
    let health = health_check(app).await;
    let feeds = feed_details(app).await;

    let (total, errors) = app.ingest.parser_stats().await;
    let success_rate = if total == 0 { 1.0 } else { (total - errors) as f64 / total as f64 };
    let average_delay_ms = app.ingest.heartbeat_snapshot().await.map(|h| h.delay_ms);
    let uptime = Utc::now() - app.started_at;
    let formatted_uptime = format_duration(uptime.num_seconds().max(0));

    let recent_parser_errors =
        app.ingest.recent_parser_errors(5).await.iter().map(ParserErrorEntryView::from).collect();

    EnhancedStatus {
        health,
        feeds,
        parser: ParserMetrics { success_rate, average_delay_ms, formatted_uptime },
        recent_parser_errors,
    }
}

/// Detailed monitoring is the same shape as enhanced status (spec §4.9
/// describes them with identical fields); kept as a distinct entry point so
/// the HTTP surface can evolve the two independently.
pub async fn detailed_monitoring(app: &AppState) -> EnhancedStatus {
    enhanced_status(app).await
}

async fn feed_details(app: &AppState) -> Vec<FeedDetail> {
    let now = Utc::now();
    let registry = app.feeds.read().await;
    let mut out = Vec::with_capacity(registry.len());
    for (name, handle) in registry.iter() {
        let state = handle.state.read().expect("feed state lock poisoned").clone();
        let status = match state.status {
            Some(ConnectorStatus::Connecting) => "connecting",
            Some(ConnectorStatus::Connected) => "connected",
            Some(ConnectorStatus::Disconnected) | None => "disconnected",
        };
        let session_uptime_ms = state
            .connected_at
            .map(|t| (now - t).num_milliseconds().max(0))
            .unwrap_or(0);
        let total_since_startup = (now - app.started_at).num_milliseconds().max(1) as f64;
        let uptime_percent = ((state.total_uptime_ms as f64 + session_uptime_ms as f64) / total_since_startup) * 100.0;
        out.push(FeedDetail {
            feed: name.clone(),
            status,
            session_uptime_ms,
            total_uptime_ms: state.total_uptime_ms,
            reconnect_count: state.reconnect_count,
            uptime_percent_since_startup: uptime_percent.clamp(0.0, 100.0),
        });
    }
    out
}

pub async fn dashboard(app: &AppState) -> Result<Dashboard, StoreError> {
    let since = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
    Ok(Dashboard {
        event_total: app.store.count()?,
        events_by_source: app.store.counts_by_source()?,
        five_minute_event_rate: app.store.count_events_since(&since)? as f64 / 5.0,
        ws_client_history: app.store.ws_client_history(60)?,
        rate_limit_top_ips: app.rate_limiter.top_ips(10)?,
        rate_limit_denied_total: app.store.rate_limit_total_denied()?,
        table_stats: app.store.table_stats()?,
        config: app.config.get(),
    })
}

#[derive(Debug, Clone)]
pub enum AdminAction {
    ReconnectFeed { feed: String },
    ClearOldEvents { days_old: Option<u32> },
    ResetRateLimit { ip: String },
    TriggerRollup,
    CleanupNow,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminActionResult {
    pub action: String,
    pub detail: HashMap<String, serde_json::Value>,
}

pub async fn apply_admin_action(app: &AppState, action: AdminAction) -> Result<AdminActionResult, StoreError> {
    match action {
        AdminAction::ReconnectFeed { feed } => {
            let registry = app.feeds.read().await;
            let mut detail = HashMap::new();
            let found = if let Some(handle) = registry.get(&feed) {
                handle.reconnect.notify_one();
                true
            } else {
                false
            };
            detail.insert("found".to_owned(), serde_json::json!(found));
            Ok(AdminActionResult { action: "reconnect_feed".to_owned(), detail })
        }
        AdminAction::ClearOldEvents { days_old } => {
            let days = days_old.unwrap_or(30);
            let deleted = app.store.delete_older_than(days)?;
            let mut detail = HashMap::new();
            detail.insert("deleted".to_owned(), serde_json::json!(deleted));
            Ok(AdminActionResult { action: "clear_old_events".to_owned(), detail })
        }
        AdminAction::ResetRateLimit { ip } => {
            let deleted = app.rate_limiter.reset(&ip, None)?;
            let mut detail = HashMap::new();
            detail.insert("deleted".to_owned(), serde_json::json!(deleted));
            Ok(AdminActionResult { action: "reset_ratelimit".to_owned(), detail })
        }
        AdminAction::TriggerRollup => {
            app.metrics.perform_rollup()?;
            Ok(AdminActionResult { action: "trigger_rollup".to_owned(), detail: HashMap::new() })
        }
        AdminAction::CleanupNow => {
            app.metrics.perform_cleanup()?;
            app.rate_limiter.cleanup(Utc::now().timestamp())?;
            Ok(AdminActionResult { action: "cleanup_now".to_owned(), detail: HashMap::new() })
        }
    }
}

fn format_duration(total_seconds: i64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_compact_duration_without_empty_leading_units() {
        assert_eq!(format_duration(45), "0m 45s");
        assert_eq!(format_duration(3661), "1h 1m 1s");
        assert_eq!(format_duration(90_061), "1d 1h 1m 1s");
    }
}
