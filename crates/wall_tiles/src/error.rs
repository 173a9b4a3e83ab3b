//! Tile error types

use crate::lod::TileId;
use thiserror::Error;

/// Errors raised while opening content or producing tiles
#[derive(Debug, Error)]
pub enum TileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Tile {0} out of range")]
    TileOutOfRange(TileId),

    #[error("Rasterization failed: {0}")]
    Rasterization(String),

    #[error("Unsupported content uri: {0}")]
    UnsupportedUri(String),

    #[error("Content unavailable: {0}")]
    Unavailable(String),
}

/// Result type for tile operations
pub type TileResult<T> = Result<T, TileError>;
