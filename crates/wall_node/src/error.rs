//! Node error types

use thiserror::Error;
use wall_sync::SyncError;
use wall_tiles::TileError;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Validation(String),
}

/// Errors that stop a wall node
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("Tile error: {0}")]
    Tile(#[from] TileError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Presentation failed: {0}")]
    Presenter(String),

    #[error("{0} wall nodes failed")]
    NodesFailed(usize),
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
