//! Request logging, periodic rollups, retention cleanup, and the
//! Prometheus/JSON exporters (spec §4.5, §6).

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::ConfigManager;
use crate::error::StoreError;
use crate::store::Store;

pub struct Metrics {
    store: Arc<Store>,
    config: Arc<ConfigManager>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Live, non-store-backed readings the exporters fold in alongside the
/// persisted request/event history — connection hub size, per-feed
/// liveness, and parser heartbeat age (spec §4.5's `canaria_websocket_clients`,
/// `canaria_feed_connected{feed}`, `canaria_parser_heartbeat_age_seconds`).
#[derive(Debug, Clone, Default)]
pub struct LiveContext {
    pub ws_clients: usize,
    pub feed_connected: Vec<(String, bool)>,
    pub parser_heartbeat_age_seconds: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonSnapshot {
    pub event_count: i64,
    pub events_by_source: Vec<(String, i64)>,
    pub request_rate_per_minute: f64,
    pub latency_ms: Percentiles,
    pub rate_limit_denied_total: i64,
    pub ws_clients: usize,
    pub feed_connected: Vec<(String, bool)>,
    pub parser_heartbeat_age_seconds: Option<i64>,
}

impl Metrics {
    pub fn new(store: Arc<Store>, config: Arc<ConfigManager>) -> Self {
        Metrics { store, config }
    }

    pub fn log_request(
        &self,
        endpoint: &str,
        method: &str,
        status: u16,
        duration_ms: u64,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<(), StoreError> {
        let ts = Utc::now().to_rfc3339();
        self.store.log_request(&ts, endpoint, method, status, duration_ms, ip, user_agent)
    }

    pub fn record_feed_event(&self, feed: &str, event: &str, details: &str) -> Result<(), StoreError> {
        let ts = Utc::now().to_rfc3339();
        self.store.record_feed_event(&ts, feed, event, details)
    }

    pub fn record_ws_client_count(&self, count: i64) -> Result<(), StoreError> {
        let bucket = Utc::now().format("%Y-%m-%dT%H:%M:00Z").to_string();
        self.store.record_ws_client_count(&bucket, count)
    }

    /// Nearest-rank percentiles over request durations logged in the last
    /// five minutes (spec §4.5). Empty window yields zeroed percentiles.
    pub fn latency_percentiles(&self) -> Result<Percentiles, StoreError> {
        let since = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        let mut durations = self.store.recent_durations_ms(&since)?;
        if durations.is_empty() {
            return Ok(Percentiles::default());
        }
        durations.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let pick = |p: f64| -> f64 {
            let rank = ((p * durations.len() as f64).ceil() as usize).clamp(1, durations.len());
            durations[rank - 1]
        };
        Ok(Percentiles { p50: pick(0.50), p95: pick(0.95), p99: pick(0.99) })
    }

    pub fn json_snapshot(&self, live: LiveContext) -> Result<JsonSnapshot, StoreError> {
        let since = (Utc::now() - chrono::Duration::minutes(5)).to_rfc3339();
        Ok(JsonSnapshot {
            event_count: self.store.count()?,
            events_by_source: self.store.counts_by_source()?,
            request_rate_per_minute: self.store.request_rate_per_minute(&since)?,
            latency_ms: self.latency_percentiles()?,
            rate_limit_denied_total: self.store.rate_limit_total_denied()?,
            ws_clients: live.ws_clients,
            feed_connected: live.feed_connected,
            parser_heartbeat_age_seconds: live.parser_heartbeat_age_seconds,
        })
    }

    /// Prometheus text exposition (spec §4.5): the stable metric names given
    /// verbatim in the spec, plus the request-total/duration pair.
    pub fn export_prometheus(&self, live: LiveContext) -> Result<String, StoreError> {
        let mut out = String::new();

        out.push_str("# HELP canaria_events_total Count of stored events by source.\n");
        out.push_str("# TYPE canaria_events_total counter\n");
        for (source, count) in self.store.counts_by_source()? {
            out.push_str(&format!("canaria_events_total{{source=\"{source}\"}} {count}\n"));
        }

        out.push_str("# HELP canaria_websocket_clients Currently connected WebSocket subscribers.\n");
        out.push_str("# TYPE canaria_websocket_clients gauge\n");
        out.push_str(&format!("canaria_websocket_clients {}\n", live.ws_clients));

        out.push_str("# HELP canaria_parser_heartbeat_age_seconds Seconds since the authority poller's last heartbeat.\n");
        out.push_str("# TYPE canaria_parser_heartbeat_age_seconds gauge\n");
        out.push_str(&format!(
            "canaria_parser_heartbeat_age_seconds {}\n",
            live.parser_heartbeat_age_seconds.map(|s| s as f64).unwrap_or(-1.0)
        ));

        out.push_str("# HELP canaria_feed_connected Whether a feed connector is currently connected (1) or not (0).\n");
        out.push_str("# TYPE canaria_feed_connected gauge\n");
        for (feed, connected) in &live.feed_connected {
            out.push_str(&format!("canaria_feed_connected{{feed=\"{feed}\"}} {}\n", u8::from(*connected)));
        }

        out.push_str("# HELP canaria_requests_total Total HTTP requests observed, by endpoint and status.\n");
        out.push_str("# TYPE canaria_requests_total counter\n");
        for (endpoint, status, count) in self.store.request_totals_all_time()? {
            out.push_str(&format!("canaria_requests_total{{endpoint=\"{endpoint}\",status=\"{status}\"}} {count}\n"));
        }

        out.push_str("# HELP canaria_request_duration_seconds Average request duration per endpoint.\n");
        out.push_str("# TYPE canaria_request_duration_seconds gauge\n");
        for (endpoint, avg_ms) in self.store.avg_duration_all_time_by_endpoint()? {
            out.push_str(&format!("canaria_request_duration_seconds{{endpoint=\"{endpoint}\"}} {}\n", avg_ms / 1000.0));
        }

        Ok(out)
    }

    /// Aggregate the closed window `[currentWindow - interval, currentWindow)`
    /// into `metricsRollup` rows: per-(endpoint, status) request counts under
    /// `requests_total`, and per-endpoint average duration under
    /// `request_duration_avg_ms` (spec §4.5). Idempotent over the same
    /// window — `Store::upsert_rollup` overwrites rather than accumulates.
    pub fn perform_rollup(&self) -> Result<(), StoreError> {
        let cfg = self.config.get();
        let interval = cfg.metrics.rollup_interval;
        let interval_seconds = interval.as_seconds() as i64;
        let now = Utc::now().timestamp();
        let window_end = now - now.rem_euclid(interval_seconds);
        let window_start = window_end - interval_seconds;
        let start_ts = chrono::DateTime::from_timestamp(window_start, 0).unwrap_or_else(Utc::now).to_rfc3339();
        let end_ts = chrono::DateTime::from_timestamp(window_end, 0).unwrap_or_else(Utc::now).to_rfc3339();
        let bucket_ts = end_ts.clone();
        let interval_seconds_u32 = interval.as_seconds() as u32;

        for (endpoint, status, count) in self.store.request_counts_in_window(&start_ts, &end_ts)? {
            let labels = format!("{{\"endpoint\":\"{endpoint}\",\"status\":\"{status}\"}}");
            self.store.upsert_rollup(&bucket_ts, interval_seconds_u32, "requests_total", &labels, count as f64, count)?;
        }
        for (endpoint, avg_ms) in self.store.avg_duration_by_endpoint(&start_ts, &end_ts)? {
            let labels = format!("{{\"endpoint\":\"{endpoint}\"}}");
            self.store.upsert_rollup(&bucket_ts, interval_seconds_u32, "request_duration_avg_ms", &labels, avg_ms, 1)?;
        }
        Ok(())
    }

    /// Prune request logs, rollups, feed event log, and ws client history
    /// past their retention windows (spec §4.5, §9 maintenance task).
    pub fn perform_cleanup(&self) -> Result<(), StoreError> {
        let cfg = self.config.get();
        let now = Utc::now();
        let request_log_cutoff = (now - chrono::Duration::days(cfg.metrics.retention_days as i64)).to_rfc3339();
        let rollup_cutoff = (now - chrono::Duration::days(cfg.metrics.rollup_retention_days as i64)).to_rfc3339();
        let feed_event_cutoff = (now - chrono::Duration::days(7)).to_rfc3339();
        let ws_history_cutoff = (now - chrono::Duration::hours(24)).to_rfc3339();
        self.store.delete_request_logs_older_than(&request_log_cutoff)?;
        self.store.delete_rollups_older_than(&rollup_cutoff)?;
        self.store.delete_feed_events_older_than(&feed_event_cutoff)?;
        self.store.delete_ws_client_history_older_than(&ws_history_cutoff)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> Metrics {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let config = Arc::new(ConfigManager::new(store.clone()).unwrap());
        Metrics::new(store, config)
    }

    #[test]
    fn rollup_is_idempotent_for_the_same_bucket() {
        let m = metrics();
        // Land the sample inside the *closed* window `perform_rollup` will
        // compute, not the still-open current one.
        let interval_seconds = 300i64;
        let now = Utc::now().timestamp();
        let window_end = now - now.rem_euclid(interval_seconds);
        let window_start = window_end - interval_seconds;
        let ts = chrono::DateTime::from_timestamp(window_start + 1, 0).unwrap().to_rfc3339();
        for _ in 0..3 {
            m.store.log_request(&ts, "/v1/events", "GET", 200, 12, "1.1.1.1", None).unwrap();
        }
        m.perform_rollup().unwrap();
        m.perform_rollup().unwrap();
        let stats = m.store.table_stats().unwrap();
        // requests_total (one endpoint/status pair) + request_duration_avg_ms (one endpoint) — not duplicated on re-run.
        assert_eq!(stats.metrics_rollup, 2);
    }

    #[test]
    fn percentiles_are_zeroed_with_no_recent_requests() {
        let m = metrics();
        let p = m.latency_percentiles().unwrap();
        assert_eq!(p.p50, 0.0);
        assert_eq!(p.p99, 0.0);
    }

    #[test]
    fn percentiles_pick_nearest_rank() {
        let m = metrics();
        for ms in [10u64, 20, 30, 40, 100] {
            m.log_request("/v1/events", "GET", 200, ms, "1.1.1.1", None).unwrap();
        }
        let p = m.latency_percentiles().unwrap();
        assert_eq!(p.p50, 30.0);
        assert_eq!(p.p99, 100.0);
    }

    #[test]
    fn prometheus_export_contains_expected_metric_names() {
        let m = metrics();
        let live = LiveContext {
            ws_clients: 3,
            feed_connected: vec![("JMA".to_owned(), true), ("P2PQUAKE".to_owned(), false)],
            parser_heartbeat_age_seconds: Some(7),
        };
        let text = m.export_prometheus(live).unwrap();
        assert!(text.contains("canaria_events_total{source="));
        assert!(text.contains("canaria_websocket_clients 3"));
        assert!(text.contains("canaria_parser_heartbeat_age_seconds 7"));
        assert!(text.contains("canaria_feed_connected{feed=\"JMA\"} 1"));
        assert!(text.contains("canaria_feed_connected{feed=\"P2PQUAKE\"} 0"));
        assert!(text.contains("canaria_requests_total{endpoint="));
        assert!(text.contains("canaria_request_duration_seconds{endpoint="));
    }

    #[test]
    fn json_snapshot_folds_in_live_context() {
        let m = metrics();
        let live = LiveContext { ws_clients: 2, feed_connected: vec![], parser_heartbeat_age_seconds: None };
        let snap = m.json_snapshot(live).unwrap();
        assert_eq!(snap.ws_clients, 2);
        assert!(snap.parser_heartbeat_age_seconds.is_none());
    }
}
