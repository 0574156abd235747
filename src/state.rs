//! Wires every component into one shared, cloneable handle passed to axum
//! handlers — the same role the teacher's `AppState` plays, generalized
//! from per-stream broadcast registries to Canaria's single-stream engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};

use crate::config::ConfigManager;
use crate::feed::FeedStateHandle;
use crate::hub::ConnectionHub;
use crate::ingest::Ingest;
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::signer::Signer;
use crate::store::Store;

#[derive(Clone)]
pub struct FeedHandle {
    pub state: FeedStateHandle,
    pub reconnect: Arc<Notify>,
}

pub type FeedRegistry = Arc<RwLock<HashMap<String, FeedHandle>>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<ConfigManager>,
    pub signer: Arc<Signer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<Metrics>,
    pub hub: Arc<ConnectionHub>,
    pub ingest: Arc<Ingest>,
    pub feeds: FeedRegistry,
    pub started_at: DateTime<Utc>,
    pub admin_secret: Arc<str>,
    pub poller_token: Arc<str>,
}

impl AppState {
    pub async fn register_feed(&self, name: &str, handle: FeedHandle) {
        self.feeds.write().await.insert(name.to_owned(), handle);
    }

    pub async fn feed_names(&self) -> Vec<String> {
        self.feeds.read().await.keys().cloned().collect()
    }
}
