//! Accepts events from connectors and from the authenticated poller, writes
//! through Store, signs, broadcasts, and schedules backup projection
//! (spec §4.8). The Store is single-writer from this module — read-only
//! callers (dashboard, health, metrics) only ever observe committed state.

use std::collections::VecDeque;
use std::sync::Arc;

use canaria_protocol::{Event, Heartbeat, SubmitRequest, SubmitResponse};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::IngestError;
use crate::hub::ConnectionHub;
use crate::signer::Signer;
use crate::store::Store;

const MAX_PARSER_ERRORS: usize = 10;

#[derive(Debug, Clone)]
pub struct ParserErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
}

struct IngestState {
    heartbeat: Option<Heartbeat>,
    /// Starts `true`: a fresh process has never resynced with the poller,
    /// so the first reachable heartbeat must request one (spec §8 scenario
    /// 5 — the very first successful heartbeat responds `{sync:true}`).
    needs_authority_sync: bool,
    parser_errors: VecDeque<ParserErrorEntry>,
    last_stored_at: Option<DateTime<Utc>>,
    heartbeat_total: u64,
    heartbeat_error_total: u64,
    last_heartbeat_received_at: Option<DateTime<Utc>>,
}

impl Default for IngestState {
    fn default() -> Self {
        IngestState {
            heartbeat: None,
            needs_authority_sync: true,
            parser_errors: VecDeque::new(),
            last_stored_at: None,
            heartbeat_total: 0,
            heartbeat_error_total: 0,
            last_heartbeat_received_at: None,
        }
    }
}

pub struct Ingest {
    store: Arc<Store>,
    signer: Arc<Signer>,
    hub: Arc<ConnectionHub>,
    backup: Arc<crate::backup::BackupWriter>,
    state: RwLock<IngestState>,
}

impl Ingest {
    pub fn new(store: Arc<Store>, signer: Arc<Signer>, hub: Arc<ConnectionHub>, backup: Arc<crate::backup::BackupWriter>) -> Self {
        Ingest { store, signer, hub, backup, state: RwLock::new(IngestState::default()) }
    }

    /// Connector callback entry point: append a just-normalized batch to
    /// the pipeline.
    pub async fn handle_event(&self, events: Vec<Event>) -> Result<u64, IngestError> {
        self.ingest_batch(events).await
    }

    /// Authenticated poller submission entry point (spec §4.8).
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, IngestError> {
        let sync = if let Some(heartbeat) = &request.heartbeat {
            self.record_heartbeat(heartbeat).await
        } else {
            false
        };
        self.ingest_batch(request.events).await?;
        Ok(SubmitResponse { sync })
    }

    pub async fn heartbeat_snapshot(&self) -> Option<Heartbeat> {
        self.state.read().await.heartbeat.clone()
    }

    /// Seconds since the last heartbeat was recorded, or `None` if no
    /// heartbeat has ever been observed (used by the parser health check).
    pub async fn heartbeat_age_seconds(&self) -> Option<i64> {
        self.state.read().await.last_heartbeat_received_at.map(|t| (Utc::now() - t).num_seconds().max(0))
    }

    pub async fn last_stored_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_stored_at
    }

    pub async fn recent_parser_errors(&self, n: usize) -> Vec<ParserErrorEntry> {
        self.state.read().await.parser_errors.iter().take(n).cloned().collect()
    }

    /// `(total heartbeats observed, heartbeats that carried a parse error)`.
    pub async fn parser_stats(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.heartbeat_total, state.heartbeat_error_total)
    }

    /// Stores the heartbeat snapshot, maintains the parser-error ring, and
    /// resolves the `needsAuthoritySync` handshake: if the authority was
    /// previously unreachable (flag set) and is now reachable again, the
    /// flag is atomically cleared and the poller is told to resync rather
    /// than send only deltas.
    async fn record_heartbeat(&self, heartbeat: &Heartbeat) -> bool {
        let mut state = self.state.write().await;
        state.heartbeat = Some(heartbeat.clone());
        state.heartbeat_total += 1;
        state.last_heartbeat_received_at = Some(Utc::now());

        if let Some(error) = &heartbeat.error {
            state.heartbeat_error_total += 1;
            state.parser_errors.push_front(ParserErrorEntry { timestamp: Utc::now(), error: error.clone() });
            state.parser_errors.truncate(MAX_PARSER_ERRORS);
        }

        if !heartbeat.authority_reachable {
            state.needs_authority_sync = true;
            false
        } else if state.needs_authority_sync {
            state.needs_authority_sync = false;
            true
        } else {
            false
        }
    }

    async fn ingest_batch(&self, events: Vec<Event>) -> Result<u64, IngestError> {
        if events.is_empty() {
            return Ok(0);
        }
        let inserted = self.store.insert(&events)?;
        if inserted > 0 {
            self.state.write().await.last_stored_at = Some(Utc::now());

            let mut signed = Vec::with_capacity(events.len());
            for event in &events {
                signed.push(self.signer.sign(event)?);
            }
            self.hub.broadcast(canaria_protocol::WsFrame::signed_batch(signed));

            self.spawn_backup_upload();
        }
        Ok(inserted)
    }

    /// Fire-and-forget: failures are logged by `BackupWriter`, never
    /// surfaced to the caller of `ingest_batch`.
    fn spawn_backup_upload(&self) {
        let store = self.store.clone();
        let backup = self.backup.clone();
        tokio::spawn(async move {
            let query = crate::store::EventQuery { limit: Some(1000), ..Default::default() };
            match store.list(&query) {
                Ok(events) => backup.upload(events).await,
                Err(e) => tracing::warn!(error = %e, "backup projection query failed"),
            }
        });
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

    fn ingest(dir: &std::path::Path) -> Ingest {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let signer = Arc::new(Signer::from_seed([1u8; 32]));
        let hub = Arc::new(ConnectionHub::new());
        let backup = Arc::new(crate::backup::BackupWriter::new(dir.join("events.json")));
        Ingest::new(store, signer, hub, backup)
    }

    #[tokio::test]
    async fn handle_event_dedups_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let ingest = ingest(dir.path());
        assert_eq!(ingest.handle_event(vec![event("a")]).await.unwrap(), 1);
        assert_eq!(ingest.handle_event(vec![event("a")]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn first_reachable_heartbeat_requests_sync_then_flag_stays_clear() {
        let dir = tempfile::tempdir().unwrap();
        let ingest = ingest(dir.path());

        let healthy = Heartbeat { authority_reachable: true, last_parse_time: "now".into(), last_event_time: None, delay_ms: 0, error: None, stats: None };
        let resp = ingest.submit(SubmitRequest { heartbeat: Some(healthy.clone()), events: vec![] }).await.unwrap();
        assert!(resp.sync, "a fresh process has never resynced, so the first reachable heartbeat must request one");

        let resp_again = ingest.submit(SubmitRequest { heartbeat: Some(healthy), events: vec![] }).await.unwrap();
        assert!(!resp_again.sync, "flag must not re-trigger once cleared");
    }

    #[tokio::test]
    async fn sync_flag_clears_again_after_a_later_outage() {
        let dir = tempfile::tempdir().unwrap();
        let ingest = ingest(dir.path());

        let healthy = Heartbeat { authority_reachable: true, last_parse_time: "now".into(), last_event_time: None, delay_ms: 0, error: None, stats: None };
        ingest.submit(SubmitRequest { heartbeat: Some(healthy.clone()), events: vec![] }).await.unwrap();

        let unreachable = Heartbeat { authority_reachable: false, ..healthy.clone() };
        ingest.submit(SubmitRequest { heartbeat: Some(unreachable), events: vec![] }).await.unwrap();

        let resp = ingest.submit(SubmitRequest { heartbeat: Some(healthy), events: vec![] }).await.unwrap();
        assert!(resp.sync, "authority came back after an outage, poller must resync");
    }

    #[tokio::test]
    async fn parser_error_ring_caps_at_ten() {
        let dir = tempfile::tempdir().unwrap();
        let ingest = ingest(dir.path());
        for i in 0..15 {
            let hb = Heartbeat { authority_reachable: true, last_parse_time: "now".into(), last_event_time: None, delay_ms: 0, error: Some(format!("err{i}")), stats: None };
            ingest.submit(SubmitRequest { heartbeat: Some(hb), events: vec![] }).await.unwrap();
        }
        let errors = ingest.recent_parser_errors(20).await;
        assert_eq!(errors.len(), MAX_PARSER_ERRORS);
        assert_eq!(errors[0].error, "err14");
    }
}
