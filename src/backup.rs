//! Fire-and-forget "backup projection" writer (spec §1, §4.8): a static,
//! low-latency snapshot of the most recent events so read clients keep
//! working when the primary service is unreachable.

use std::path::PathBuf;

use canaria_protocol::Event;
use serde::Serialize;

const MAX_PROJECTION_EVENTS: usize = 1000;
const UPLOAD_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Projection<'a> {
    last_updated: String,
    events: &'a [Event],
}

pub struct BackupWriter {
    path: PathBuf,
}

impl BackupWriter {
    pub fn new(path: PathBuf) -> Self {
        BackupWriter { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Writes up to the most recent 1000 events to the configured path.
    /// Errors are logged, never surfaced — the caller's request must not
    /// wait on or fail because of this.
    pub async fn upload(&self, mut events: Vec<Event>) {
        events.truncate(MAX_PROJECTION_EVENTS);
        let projection = Projection { last_updated: chrono::Utc::now().to_rfc3339(), events: &events };
        let body = match serde_json::to_vec(&projection) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "backup projection serialize failed");
                return;
            }
        };
        let path = self.path.clone();
        let write = tokio::fs::write(&path, body);
        match tokio::time::timeout(UPLOAD_TIMEOUT, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, path = %path.display(), "backup projection write failed"),
            Err(_) => tracing::warn!(path = %path.display(), "backup projection write timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> Event {
        Event {
            event_id: id.to_owned(),
            source: canaria_protocol::Source::Jma,
            receive_source: "WolfX".to_owned(),
            kind: "EEW".to_owned(),
            report_type: None,
            time: "2026-01-01T00:00:00Z".to_owned(),
            issue_time: None,
            receive_time: "2026-01-01T00:00:01Z".to_owned(),
            latitude: None,
            longitude: None,
            magnitude: None,
            depth: None,
            intensity: None,
            region: None,
            advisory: None,
            revision: None,
        }
    }

    #[tokio::test]
    async fn upload_writes_truncated_json_projection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        let writer = BackupWriter::new(path.clone());
        let events: Vec<Event> = (0..1500).map(|i| event(&i.to_string())).collect();
        writer.upload(events).await;

        let body = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["events"].as_array().unwrap().len(), 1000);
    }
}
