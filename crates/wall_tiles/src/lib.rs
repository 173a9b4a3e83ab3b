//! # wall_tiles
//!
//! Multi-resolution tile engine for wall content.
//!
//! ## Architecture
//!
//! ```text
//! content uri ──► DataSourceFactory ──► TileDataSource (ImagePyramid | DocumentTiler)
//!                                               │
//!      window footprint ──► LodSynchronizer ────┤ LOD + visible tile set
//!                                               ▼
//!                               TileFetcher workers ──► TileCache ──► render thread
//! ```
//!
//! LOD 0 is full resolution; every LOD above halves it until the content
//! fits in one tile. Sources are shared by uri, tiles are cached per source
//! and loaded off the render thread.

pub mod cache;
pub mod document;
pub mod error;
pub mod factory;
pub mod fetcher;
pub mod lod;
pub mod pyramid;
pub mod source;
pub mod synchronizer;
pub mod tree;

pub use cache::{CacheStats, EvictionPolicy, MaxTiles, TileCache, Unbounded};
pub use document::{DocumentTiler, Rasterizer, TestPattern};
pub use error::{TileError, TileResult};
pub use factory::{DataSourceFactory, PatternLoader, PyramidLoader, SourceLoader};
pub use fetcher::{FetchedTile, TileFetcher, TileRequest};
pub use lod::{LodTools, TileId, TileIndex, DEFAULT_TILE_SIZE, MAX_TILE_COUNT};
pub use pyramid::{ImagePyramid, LevelGrid, PyramidGenerator, PyramidManifest};
pub use source::{TileDataSource, TileImage};
pub use synchronizer::{LodState, LodSynchronizer, TileRefresh, MAX_RETRY_INTERVAL};
pub use tree::{PyramidNode, PyramidTree};
