//! Shared error types. Each subsystem gets its own `thiserror` enum rather
//! than a single crate-wide error, matching the teacher's `receiver`/
//! `forwarder` crates (the newer idiom in the pack; `services/server`
//! predates the `thiserror` switch and is not carried forward).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connect error: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Ws(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("backlog fetch error: {0}")]
    Backlog(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error("validation failed: {0}")]
    Validation(String),
}
