//! Error types for the rebalancing engine.

use std::path::PathBuf;

/// All errors that can surface past engine boundaries.
///
/// Per-protocol planning skips and per-operation execution failures are
/// *data* (`PlanningSkip`, `OperationResult`), not errors: they are
/// contained inside a run and recorded in its outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("portfolio has zero value, nothing to rebalance")]
    ZeroPortfolio,

    #[error("a rebalance run is already in progress for wallet {wallet}")]
    ConcurrentRun { wallet: String },

    #[error("invalid settings: {0}")]
    SettingsValidation(String),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::ChainError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("failed to read snapshot file {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse snapshot JSON: {0}")]
    SnapshotParse(#[from] serde_json::Error),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
