//! Durable, deduplicating event repository and auxiliary tables (spec §3,
//! §4.1). Wraps a single `rusqlite::Connection` behind a mutex — the mutex
//! is the "serialize at the store boundary" point spec §5 calls for, and
//! matches the teacher's `forwarder::storage::journal` embedded-sqlite
//! pattern rather than `services/server`'s Postgres/sqlx pool (Canaria is a
//! single logical writer; there is no horizontally-scaled deployment to
//! pool connections for).

use std::sync::Mutex;

use canaria_protocol::{Event, ReportType, Source};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

/// Optional AND-combined filters for [`Store::list`].
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub since: Option<String>,
    pub until: Option<String>,
    pub source: Option<Source>,
    pub r#type: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TableStats {
    pub events: i64,
    pub request_logs: i64,
    pub metrics_rollup: i64,
    pub rate_limits: i64,
    pub feed_events: i64,
    pub ws_client_history: i64,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the store at `path`. Applies durability pragmas and
    /// the idempotent schema, then runs additive column migration.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    // -----------------------------------------------------------------
    // Events (C1)
    // -----------------------------------------------------------------

    /// Transactional batch insert, idempotent on `event_id`. Returns the
    /// count of rows that actually materialized (spec §4.1, §8 invariant:
    /// `insert([e, e])` inserts exactly one row).
    pub fn insert(&self, events: &[Event]) -> Result<u64, StoreError> {
        let mut conn = self.conn.lock().expect("store mutex poisoned");
        let tx = conn.transaction()?;
        let mut inserted = 0u64;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO events (
                    event_id, source, receive_source, type, report_type, time,
                    issue_time, receive_time, latitude, longitude, magnitude,
                    depth, intensity, region, advisory, revision
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            )?;
            for e in events {
                let report_type = e
                    .report_type
                    .as_ref()
                    .map(|rt| serde_json::to_string(rt).unwrap_or_default());
                let changed = stmt.execute(params![
                    e.event_id,
                    e.source.as_str(),
                    e.receive_source,
                    e.kind,
                    report_type,
                    e.time,
                    e.issue_time,
                    e.receive_time,
                    e.latitude,
                    e.longitude,
                    e.magnitude,
                    e.depth,
                    e.intensity,
                    e.region,
                    e.advisory,
                    e.revision,
                ])?;
                inserted += changed as u64;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// The single most recent event by `time`, if any.
    pub fn latest(&self) -> Result<Option<Event>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT event_id, source, receive_source, type, report_type, time,
                    issue_time, receive_time, latitude, longitude, magnitude,
                    depth, intensity, region, advisory, revision
             FROM events ORDER BY time DESC LIMIT 1",
            [],
            row_to_event,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Filtered, `time DESC`-ordered listing (spec §4.1). Default limit 20.
    pub fn list(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut sql = String::from(
            "SELECT event_id, source, receive_source, type, report_type, time,
                    issue_time, receive_time, latitude, longitude, magnitude,
                    depth, intensity, region, advisory, revision
             FROM events WHERE 1=1",
        );
        let mut binds: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(since) = &query.since {
            sql.push_str(" AND time >= ?");
            binds.push(Box::new(since.clone()));
        }
        if let Some(until) = &query.until {
            sql.push_str(" AND time <= ?");
            binds.push(Box::new(until.clone()));
        }
        if let Some(source) = &query.source {
            sql.push_str(" AND source = ?");
            binds.push(Box::new(source.as_str().to_owned()));
        }
        if let Some(t) = &query.r#type {
            sql.push_str(" AND type = ?");
            binds.push(Box::new(t.clone()));
        }
        sql.push_str(" ORDER BY time DESC LIMIT ?");
        let limit = query.limit.unwrap_or(20);
        binds.push(Box::new(limit));

        let mut stmt = conn.prepare(&sql)?;
        let bind_refs: Vec<&dyn rusqlite::ToSql> = binds.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(bind_refs.as_slice(), row_to_event)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .map_err(StoreError::from)
    }

    pub fn count_by_source(&self, source: Source) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM events WHERE source = ?1",
            params![source.as_str()],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    /// Per-source counts for the admin dashboard.
    pub fn counts_by_source(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT source, COUNT(*) FROM events GROUP BY source")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Count of events whose `time` falls at or after `since_ts` — backs the
    /// dashboard's 5-minute event rate (spec §4.9, estimated from `time`
    /// timestamps rather than ingestion time).
    pub fn count_events_since(&self, since_ts: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM events WHERE time >= ?1",
            params![since_ts],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    pub fn oldest(&self) -> Result<Option<Event>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT event_id, source, receive_source, type, report_type, time,
                    issue_time, receive_time, latitude, longitude, magnitude,
                    depth, intensity, region, advisory, revision
             FROM events ORDER BY time ASC LIMIT 1",
            [],
            row_to_event,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn table_stats(&self) -> Result<TableStats, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count = |sql: &str| -> Result<i64, StoreError> {
            conn.query_row(sql, [], |r| r.get(0)).map_err(StoreError::from)
        };
        Ok(TableStats {
            events: count("SELECT COUNT(*) FROM events")?,
            request_logs: count("SELECT COUNT(*) FROM request_logs")?,
            metrics_rollup: count("SELECT COUNT(*) FROM metrics_rollup")?,
            rate_limits: count("SELECT COUNT(*) FROM rate_limits")?,
            feed_events: count("SELECT COUNT(*) FROM feed_events")?,
            ws_client_history: count("SELECT COUNT(*) FROM ws_client_history")?,
        })
    }

    /// Delete events older than `days`; returns the count deleted.
    pub fn delete_older_than(&self, days: u32) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let deleted = conn.execute(
            "DELETE FROM events WHERE time < datetime('now', printf('-%d days', ?1))",
            params![days],
        )?;
        Ok(deleted as u64)
    }

    // -----------------------------------------------------------------
    // Request logs (Metrics, C5)
    // -----------------------------------------------------------------

    pub fn log_request(
        &self,
        ts: &str,
        endpoint: &str,
        method: &str,
        status: u16,
        duration_ms: u64,
        ip: &str,
        user_agent: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO request_logs (ts, endpoint, method, status, duration_ms, ip, user_agent)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![ts, endpoint, method, status, duration_ms, ip, user_agent],
        )?;
        Ok(())
    }

    pub fn request_counts_in_window(
        &self,
        since_ts: &str,
        until_ts: &str,
    ) -> Result<Vec<(String, i64, i64)>, StoreError> {
        // (endpoint, status, count)
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT endpoint, status, COUNT(*) FROM request_logs
             WHERE ts >= ?1 AND ts < ?2 GROUP BY endpoint, status",
        )?;
        let rows = stmt.query_map(params![since_ts, until_ts], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All-time `(endpoint, status, count)` — backs the
    /// `canaria_requests_total{endpoint,status}` Prometheus counter.
    pub fn request_totals_all_time(&self) -> Result<Vec<(String, i64, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT endpoint, status, COUNT(*) FROM request_logs GROUP BY endpoint, status",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, i64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All-time `(endpoint, avg duration ms)` — backs
    /// `canaria_request_duration_seconds{endpoint}`.
    pub fn avg_duration_all_time_by_endpoint(&self) -> Result<Vec<(String, f64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT endpoint, AVG(duration_ms) FROM request_logs GROUP BY endpoint")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn avg_duration_by_endpoint(
        &self,
        since_ts: &str,
        until_ts: &str,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT endpoint, AVG(duration_ms) FROM request_logs
             WHERE ts >= ?1 AND ts < ?2 GROUP BY endpoint",
        )?;
        let rows = stmt.query_map(params![since_ts, until_ts], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn recent_durations_ms(&self, since_ts: &str) -> Result<Vec<f64>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt =
            conn.prepare("SELECT duration_ms FROM request_logs WHERE ts >= ?1 ORDER BY duration_ms ASC")?;
        let rows = stmt.query_map(params![since_ts], |r| r.get::<_, f64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn request_rate_per_minute(&self, since_ts: &str) -> Result<f64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM request_logs WHERE ts >= ?1",
            params![since_ts],
            |r| r.get(0),
        )?;
        Ok(count as f64 / 5.0)
    }

    pub fn delete_request_logs_older_than(&self, cutoff_ts: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.execute("DELETE FROM request_logs WHERE ts < ?1", params![cutoff_ts])? as u64)
    }

    // -----------------------------------------------------------------
    // Metrics rollup
    // -----------------------------------------------------------------

    pub fn upsert_rollup(
        &self,
        ts: &str,
        interval_seconds: u32,
        metric_name: &str,
        labels: &str,
        value: f64,
        count: i64,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO metrics_rollup (ts, interval_seconds, metric_name, labels, value, count)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(ts, interval_seconds, metric_name, labels)
             DO UPDATE SET value = excluded.value, count = excluded.count",
            params![ts, interval_seconds, metric_name, labels, value, count],
        )?;
        Ok(())
    }

    pub fn rollup_value(
        &self,
        ts: &str,
        interval_seconds: u32,
        metric_name: &str,
        labels: &str,
    ) -> Result<Option<f64>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT value FROM metrics_rollup
             WHERE ts = ?1 AND interval_seconds = ?2 AND metric_name = ?3 AND labels = ?4",
            params![ts, interval_seconds, metric_name, labels],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn delete_rollups_older_than(&self, cutoff_ts: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.execute("DELETE FROM metrics_rollup WHERE ts < ?1", params![cutoff_ts])? as u64)
    }

    // -----------------------------------------------------------------
    // Rate limiter (C4)
    // -----------------------------------------------------------------

    pub fn rate_limit_get(&self, key: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT count, window_start FROM rate_limits WHERE key = ?1",
            params![key],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)),
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Insert a fresh counter for a new window, or increment the existing
    /// one if `window_start` matches. Returns the post-increment count.
    pub fn rate_limit_bump(&self, key: &str, window_start: i64) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO rate_limits (key, count, window_start) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                count = CASE WHEN rate_limits.window_start = excluded.window_start
                             THEN rate_limits.count + 1 ELSE 1 END,
                window_start = excluded.window_start",
            params![key, window_start],
        )?;
        conn.query_row(
            "SELECT count FROM rate_limits WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    pub fn rate_limit_reset(&self, ip: &str, endpoint: Option<&str>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let pattern = match endpoint {
            Some(ep) => format!("{ip}:{ep}"),
            None => format!("{ip}:%"),
        };
        let sql = if endpoint.is_some() {
            "DELETE FROM rate_limits WHERE key = ?1"
        } else {
            "DELETE FROM rate_limits WHERE key LIKE ?1"
        };
        Ok(conn.execute(sql, params![pattern])? as u64)
    }

    pub fn rate_limit_cleanup(&self, older_than_window_start: i64) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.execute(
            "DELETE FROM rate_limits WHERE window_start < ?1",
            params![older_than_window_start],
        )? as u64)
    }

    pub fn rate_limit_top_ips(&self, n: u32) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT substr(key, 1, instr(key, ':') - 1) AS ip, SUM(count) AS total
             FROM rate_limits GROUP BY ip ORDER BY total DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![n], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn rate_limit_total_denied(&self) -> Result<i64, StoreError> {
        // Denials aren't persisted as rows (a denied request doesn't
        // increment); tracked instead via request_logs status=429.
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM request_logs WHERE status = 429",
            [],
            |r| r.get(0),
        )
        .map_err(StoreError::from)
    }

    // -----------------------------------------------------------------
    // Feed event log
    // -----------------------------------------------------------------

    pub fn record_feed_event(&self, ts: &str, feed: &str, event: &str, details: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO feed_events (ts, feed, event, details) VALUES (?1,?2,?3,?4)",
            params![ts, feed, event, details],
        )?;
        Ok(())
    }

    pub fn delete_feed_events_older_than(&self, cutoff_ts: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.execute("DELETE FROM feed_events WHERE ts < ?1", params![cutoff_ts])? as u64)
    }

    // -----------------------------------------------------------------
    // WS client history (one row per minute, last-writer-wins)
    // -----------------------------------------------------------------

    pub fn record_ws_client_count(&self, minute_bucket: &str, count: i64) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO ws_client_history (ts, count) VALUES (?1, ?2)
             ON CONFLICT(ts) DO UPDATE SET count = excluded.count",
            params![minute_bucket, count],
        )?;
        Ok(())
    }

    pub fn ws_client_history(&self, last_n_minutes: u32) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ts, count FROM ws_client_history ORDER BY ts DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![last_n_minutes], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
        })?;
        let mut out: Vec<(String, i64)> = Vec::new();
        for row in rows {
            out.push(row?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn delete_ws_client_history_older_than(&self, cutoff_ts: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        Ok(conn.execute("DELETE FROM ws_client_history WHERE ts < ?1", params![cutoff_ts])? as u64)
    }

    // -----------------------------------------------------------------
    // Config row (C2 persistence)
    // -----------------------------------------------------------------

    pub fn config_get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.query_row(
            "SELECT value FROM config WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn config_set_raw(&self, key: &str, value: &str, updated_at: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, updated_at],
        )?;
        Ok(())
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let source_str: String = row.get(1)?;
    let source: Source = source_str.parse().unwrap_or(Source::Jma);
    let report_type_str: Option<String> = row.get(4)?;
    let report_type: Option<ReportType> = report_type_str.and_then(|s| serde_json::from_str(&s).ok());
    Ok(Event {
        event_id: row.get(0)?,
        source,
        receive_source: row.get(2)?,
        kind: row.get(3)?,
        report_type,
        time: row.get(5)?,
        issue_time: row.get(6)?,
        receive_time: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        magnitude: row.get(10)?,
        depth: row.get(11)?,
        intensity: row.get(12)?,
        region: row.get(13)?,
        advisory: row.get(14)?,
        revision: row.get(15)?,
    })
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(include_str!("schema.sql"))?;
    migrate_additive_columns(conn)?;
    Ok(())
}

/// Additive column migration: tolerant of a pre-existing `events` table
/// from an earlier schema revision that is missing newer nullable columns.
fn migrate_additive_columns(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(events)")?;
    let existing: Vec<String> = stmt
        .query_map([], |r| r.get::<_, String>(1))?
        .collect::<Result<_, _>>()?;
    let wanted = [
        ("report_type", "TEXT"),
        ("issue_time", "TEXT"),
        ("region", "TEXT"),
        ("advisory", "TEXT"),
        ("revision", "TEXT"),
    ];
    for (name, ty) in wanted {
        if !existing.iter().any(|c| c == name) {
            conn.execute_batch(&format!("ALTER TABLE events ADD COLUMN {name} {ty}"))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, time: &str) -> Event {
        Event {
            event_id: id.to_owned(),
            source: Source::Jma,
            receive_source: "WolfX".to_owned(),
            kind: "EEW".to_owned(),
            report_type: None,
            time: time.to_owned(),
            issue_time: None,
            receive_time: time.to_owned(),
            latitude: Some(1.0),
            longitude: Some(2.0),
            magnitude: Some(3.0),
            depth: None,
            intensity: None,
            region: None,
            advisory: None,
            revision: None,
        }
    }

    #[test]
    fn insert_dedups_and_counts_match() {
        let store = Store::open_in_memory().unwrap();
        let a = event("A", "2026-01-01T00:00:00Z");
        let b = event("B", "2026-01-01T00:01:00Z");

        assert_eq!(store.insert(&[a.clone()]).unwrap(), 1);
        assert_eq!(store.insert(&[a, b]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.count_by_source(Source::Jma).unwrap(), 2);

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.event_id, "B");
    }

    #[test]
    fn insert_duplicate_pair_inserts_exactly_one_row() {
        let store = Store::open_in_memory().unwrap();
        let e = event("dup", "2026-01-01T00:00:00Z");
        assert_eq!(store.insert(&[e.clone(), e]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn list_filters_and_orders_descending() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert(&[
                event("1", "2026-01-01T00:00:00Z"),
                event("2", "2026-01-02T00:00:00Z"),
                event("3", "2026-01-03T00:00:00Z"),
            ])
            .unwrap();

        let results = store
            .list(&EventQuery { since: Some("2026-01-02T00:00:00Z".to_owned()), ..Default::default() })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].event_id, "3");
        assert_eq!(results[1].event_id, "2");
    }

    #[test]
    fn delete_older_than_prunes_events() {
        let store = Store::open_in_memory().unwrap();
        store.insert(&[event("old", "2000-01-01T00:00:00Z")]).unwrap();
        let deleted = store.delete_older_than(30).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
