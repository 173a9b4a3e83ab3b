//! Tile data sources
//!
//! A [`TileDataSource`] is one content (an image pyramid, a document page)
//! seen as a tile pyramid. The geometry queries are answered by the
//! source's [`LodTools`]; only [`TileDataSource::tile_image`] touches the
//! underlying data and may block.

use crate::error::{TileError, TileResult};
use crate::lod::{LodTools, TileId};
use image::RgbaImage;
use std::collections::BTreeSet;
use std::sync::Arc;
use wall_core::{Rect, RectF, Size};

/// A fully decoded tile, shared between the cache and its readers
pub type TileImage = Arc<RgbaImage>;

/// Pyramid-structured content
pub trait TileDataSource: Send + Sync {
    /// Content uri this source was opened from
    fn uri(&self) -> &str;

    /// Tile geometry of the content
    fn lod_tools(&self) -> &LodTools;

    /// Produce the image of one tile
    ///
    /// `timestamp` is the synchronized wall time of the request. Sources
    /// whose content changes over time use it to pick the frame; static
    /// sources ignore it.
    fn tile_image(&self, tile: TileId, timestamp: f64) -> TileResult<TileImage>;

    fn max_lod(&self) -> u32 {
        self.lod_tools().max_lod()
    }

    fn tiles_area(&self, lod: u32) -> Size {
        self.lod_tools().tiles_area(lod)
    }

    fn tile_rect(&self, tile: TileId) -> TileResult<Rect> {
        let tools = self.lod_tools();
        tools
            .tile_index(tile)
            .and_then(|index| tools.tile_rect(index.lod, index.x, index.y))
            .ok_or(TileError::TileOutOfRange(tile))
    }

    /// Tiles at `lod` covering the normalized `visible` area
    fn compute_visible_set(&self, visible: &RectF, lod: u32) -> BTreeSet<TileId> {
        self.lod_tools().visible_tile_ids(lod, visible)
    }
}

impl std::fmt::Debug for dyn TileDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileDataSource")
            .field("uri", &self.uri())
            .field("content_size", &self.lod_tools().content_size())
            .field("max_lod", &self.max_lod())
            .finish()
    }
}
