use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use canaria::config::ConfigManager;
use canaria::feed::jma::JmaNormalizer;
use canaria::feed::p2p::P2pNormalizer;
use canaria::feed::{ConnectorConfig, FeedConnector, FeedEventRecord};
use canaria::hub::ConnectionHub;
use canaria::ingest::Ingest;
use canaria::metrics::Metrics;
use canaria::ratelimit::RateLimiter;
use canaria::signer::Signer;
use canaria::state::{AppState, FeedHandle};
use canaria::store::Store;
use canaria::{backup, http, middleware};
use clap::{Arg, Command};
use tokio::sync::mpsc;
use tracing::info;

fn cli() -> clap::ArgMatches {
    Command::new("canaria")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Canaria Engine Authors")
        .about("Earthquake bulletin aggregation, signing, and broadcast engine")
        .arg(
            Arg::new("bind")
                .help("Address to bind the HTTP/WebSocket server to")
                .short('b')
                .long("bind")
                .default_value("0.0.0.0:8080"),
        )
        .arg(
            Arg::new("db")
                .help("Path to the sqlite database file")
                .short('d')
                .long("db")
                .default_value("canaria.sqlite3"),
        )
        .arg(
            Arg::new("admin_secret")
                .help("Bearer/query secret protecting /admin/*")
                .long("admin-secret")
                .env("CANARIA_ADMIN_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("poller_token")
                .help("Bearer token the authority poller authenticates POST /v1/events with")
                .long("poller-token")
                .env("CANARIA_POLLER_TOKEN")
                .required(true),
        )
        .arg(
            Arg::new("backup_path")
                .help("Path the backup projection JSON file is written to")
                .long("backup-path")
                .default_value("canaria-backup.json"),
        )
        .arg(
            Arg::new("jma_ws_url")
                .long("jma-ws-url")
                .default_value("wss://ws-api.wolfx.jp/jma_eew"),
        )
        .arg(
            Arg::new("jma_backlog_url")
                .long("jma-backlog-url")
                .default_value("https://api.wolfx.jp/jma_eew/recent"),
        )
        .arg(
            Arg::new("p2p_ws_url")
                .long("p2p-ws-url")
                .default_value("wss://api.p2pquake.net/v2/ws"),
        )
        .arg(
            Arg::new("p2p_backlog_url")
                .long("p2p-backlog-url")
                .default_value("https://api.p2pquake.net/v2/history?codes=551&codes=552&limit=50"),
        )
        .get_matches()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "canaria starting");

    let matches = cli();
    let bind_addr: std::net::SocketAddr =
        matches.get_one::<String>("bind").unwrap().parse().expect("invalid --bind address");
    let db_path = matches.get_one::<String>("db").unwrap().clone();
    let admin_secret: Arc<str> = matches.get_one::<String>("admin_secret").unwrap().as_str().into();
    let poller_token: Arc<str> = matches.get_one::<String>("poller_token").unwrap().as_str().into();
    let backup_path = matches.get_one::<String>("backup_path").unwrap().clone();

    let store = Arc::new(Store::open(&db_path).expect("failed to open sqlite store"));
    let config = Arc::new(ConfigManager::new(store.clone()).expect("failed to initialize config"));
    let signer = Arc::new(Signer::from_env().expect("failed to initialize signer"));
    let rate_limiter = Arc::new(RateLimiter::new(store.clone(), config.clone()));
    let metrics = Arc::new(Metrics::new(store.clone(), config.clone()));
    let hub = Arc::new(ConnectionHub::new());
    let backup_writer = Arc::new(backup::BackupWriter::new(backup_path.into()));
    let ingest = Arc::new(Ingest::new(store.clone(), signer.clone(), hub.clone(), backup_writer));

    let state = Arc::new(AppState {
        store: store.clone(),
        config: config.clone(),
        signer,
        rate_limiter,
        metrics: metrics.clone(),
        hub: hub.clone(),
        ingest: ingest.clone(),
        feeds: Default::default(),
        started_at: chrono::Utc::now(),
        admin_secret,
        poller_token,
    });

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (feed_events_tx, mut feed_events_rx) = mpsc::unbounded_channel::<FeedEventRecord>();

    spawn_feed(
        &state,
        ConnectorConfig {
            name: "JMA".to_owned(),
            ws_url: matches.get_one::<String>("jma_ws_url").unwrap().clone(),
            backlog_url: Some(matches.get_one::<String>("jma_backlog_url").unwrap().clone()),
        },
        Box::new(JmaNormalizer),
        events_tx.clone(),
        feed_events_tx.clone(),
    )
    .await;

    spawn_feed(
        &state,
        ConnectorConfig {
            name: "P2PQUAKE".to_owned(),
            ws_url: matches.get_one::<String>("p2p_ws_url").unwrap().clone(),
            backlog_url: Some(matches.get_one::<String>("p2p_backlog_url").unwrap().clone()),
        },
        Box::new(P2pNormalizer),
        events_tx,
        feed_events_tx,
    )
    .await;

    // Drains normalized event batches into the ingest pipeline — a typed
    // channel rather than a callback closure (spec §9 Design Notes).
    {
        let ingest = ingest.clone();
        tokio::spawn(async move {
            while let Some(events) = events_rx.recv().await {
                if let Err(e) = ingest.handle_event(events).await {
                    tracing::warn!(error = %e, "ingest of connector batch failed");
                }
            }
        });
    }

    // Persists feed connector state transitions into the feed event log.
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            while let Some(record) = feed_events_rx.recv().await {
                if let Err(e) = metrics.record_feed_event(&record.feed, record.event, &record.details) {
                    tracing::warn!(error = %e, "feed event log write failed");
                }
            }
        });
    }

    tokio::spawn(canaria::hub::run_keepalive(hub.clone()));
    tokio::spawn(run_maintenance(state.clone()));

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "canaria listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("canaria shut down gracefully");
}

async fn spawn_feed(
    state: &Arc<AppState>,
    config: ConnectorConfig,
    normalizer: Box<dyn canaria::feed::Normalizer>,
    events_tx: mpsc::UnboundedSender<Vec<canaria_protocol::Event>>,
    feed_events_tx: mpsc::UnboundedSender<FeedEventRecord>,
) {
    let name = config.name.clone();
    let (connector, feed_state, reconnect) = FeedConnector::new(config, normalizer, events_tx, feed_events_tx);
    state.register_feed(&name, FeedHandle { state: feed_state, reconnect }).await;
    tokio::spawn(connector.run());
}

/// Background rollup/cleanup/ws-client-count sampling, on a dedicated
/// interval rather than triggered lazily from the request path (spec §9
/// REDESIGN FLAGS, adopted).
async fn run_maintenance(state: Arc<AppState>) {
    let mut rollup_tick = tokio::time::interval(std::time::Duration::from_secs(60));
    let mut cleanup_tick =
        tokio::time::interval(std::time::Duration::from_secs(state.config.get().monitoring.cleanup_interval_hours as u64 * 3600));
    let mut ws_sample_tick = tokio::time::interval(std::time::Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = rollup_tick.tick() => {
                if let Err(e) = state.metrics.perform_rollup() {
                    tracing::warn!(error = %e, "scheduled rollup failed");
                }
            }
            _ = cleanup_tick.tick() => {
                if let Err(e) = state.metrics.perform_cleanup() {
                    tracing::warn!(error = %e, "scheduled cleanup failed");
                }
                if let Err(e) = state.rate_limiter.cleanup(chrono::Utc::now().timestamp()) {
                    tracing::warn!(error = %e, "scheduled rate limit cleanup failed");
                }
            }
            _ = ws_sample_tick.tick() => {
                if let Err(e) = state.metrics.record_ws_client_count(state.hub.size() as i64) {
                    tracing::warn!(error = %e, "ws client count sample failed");
                }
            }
        }
    }
}

fn build_router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/config", get(http::admin::get_config).put(http::admin::put_config))
        .route("/admin/dashboard", get(http::admin::dashboard))
        .route("/admin/actions", axum::routing::post(http::admin::actions));

    let public_routes = Router::new()
        .route("/v1/status", get(http::status::status))
        .route("/v1/health", get(http::status::health))
        .route("/v1/connections", get(http::status::connections))
        .route("/v1/monitoring", get(http::status::monitoring))
        .route("/v1/metrics", get(http::metrics::metrics))
        .route("/v1/events", get(http::events::list_events).post(http::events::submit_events))
        .route("/v1/events/latest", get(http::events::latest_event))
        .route("/v1/ws", get(http::ws::ws_handler));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::log_request))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown, same shape as the teacher's `services/server`.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
