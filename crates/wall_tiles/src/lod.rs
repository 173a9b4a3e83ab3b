//! Level-of-detail geometry
//!
//! LOD 0 is the full resolution image. Each LOD above halves both dimensions
//! (rounding up) until the whole image fits in a single tile, which is
//! `max_lod`. Tiles are numbered with a single [`TileId`] spanning every LOD:
//! id 0 is the root tile at `max_lod`, ids grow towards LOD 0 and run
//! row-major within a LOD.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use wall_core::{Rect, RectF, Size};

/// Default tile edge in pixels
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Most tiles one content may have, every LOD included
pub const MAX_TILE_COUNT: u32 = 1 << 22;

/// Global tile identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileId(pub u32);

impl TileId {
    pub const ROOT: TileId = TileId(0);

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile#{}", self.0)
    }
}

/// Position of a tile in the pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileIndex {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

impl TileIndex {
    pub const fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }
}

impl fmt::Display for TileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.lod, self.x, self.y)
    }
}

/// Tile geometry of one content
///
/// All operations are pure; a `LodTools` is a pair of numbers and can be
/// copied freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LodTools {
    content_size: Size,
    tile_size: u32,
    max_lod: u32,
}

impl LodTools {
    pub fn new(content_size: Size, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        let mut tools = Self {
            content_size,
            tile_size,
            max_lod: 0,
        };
        while !tools.tiles_area_unclamped(tools.max_lod).fits_in(Size::new(tile_size, tile_size)) {
            tools.max_lod += 1;
        }
        tools
    }

    pub fn content_size(&self) -> Size {
        self.content_size
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Lowest resolution LOD, a single tile
    pub fn max_lod(&self) -> u32 {
        self.max_lod
    }

    fn clamp(&self, lod: u32) -> u32 {
        lod.min(self.max_lod)
    }

    fn tiles_area_unclamped(&self, lod: u32) -> Size {
        Size::new(
            halve(self.content_size.width, lod),
            halve(self.content_size.height, lod),
        )
    }

    /// Size in pixels of the whole image at `lod`
    pub fn tiles_area(&self, lod: u32) -> Size {
        self.tiles_area_unclamped(self.clamp(lod))
    }

    /// Number of tile columns and rows at `lod`
    pub fn tile_grid_size(&self, lod: u32) -> (u32, u32) {
        let area = self.tiles_area(lod);
        (
            area.width.div_ceil(self.tile_size),
            area.height.div_ceil(self.tile_size),
        )
    }

    /// Number of tiles at `lod`, saturating at `u32::MAX`
    pub fn tile_count_at(&self, lod: u32) -> u32 {
        let (cols, rows) = self.tile_grid_size(lod);
        cols.saturating_mul(rows)
    }

    /// Number of tiles across every LOD, saturating at `u32::MAX`
    pub fn tile_count(&self) -> u32 {
        self.checked_tile_count().unwrap_or(u32::MAX)
    }

    /// Number of tiles across every LOD, `None` if it does not fit a [`TileId`]
    pub fn checked_tile_count(&self) -> Option<u32> {
        (0..=self.max_lod).try_fold(0u32, |total, lod| {
            let (cols, rows) = self.tile_grid_size(lod);
            total.checked_add(cols.checked_mul(rows)?)
        })
    }

    /// True if every tile can be numbered and the count stays within [`MAX_TILE_COUNT`]
    pub fn is_addressable(&self) -> bool {
        self.checked_tile_count()
            .is_some_and(|count| count <= MAX_TILE_COUNT)
    }

    /// Pixel rectangle of a tile in its LOD's image, clipped to that image
    pub fn tile_rect(&self, lod: u32, x: u32, y: u32) -> Option<Rect> {
        let lod = self.clamp(lod);
        let (cols, rows) = self.tile_grid_size(lod);
        if x >= cols || y >= rows {
            return None;
        }
        let area = self.tiles_area(lod);
        let left = x * self.tile_size;
        let top = y * self.tile_size;
        Some(Rect::new(
            left,
            top,
            self.tile_size.min(area.width - left),
            self.tile_size.min(area.height - top),
        ))
    }

    /// Tiles at `lod` whose rectangle overlaps `visible` with a positive area
    ///
    /// `visible` is normalized to the content, it is clipped to the unit
    /// square first. A zero-area rectangle yields an empty set.
    pub fn visible_tile_indices(&self, lod: u32, visible: &RectF) -> BTreeSet<(u32, u32)> {
        let mut tiles = BTreeSet::new();
        let Some(visible) = visible.intersected(&RectF::UNIT) else {
            return tiles;
        };

        let lod = self.clamp(lod);
        let area = self.tiles_area(lod);
        let (cols, rows) = self.tile_grid_size(lod);
        if cols == 0 || rows == 0 {
            return tiles;
        }
        let pixels = visible.scaled(area.width as f64, area.height as f64);
        let ts = self.tile_size as f64;

        let x0 = ((pixels.x / ts).floor() as u32).min(cols - 1);
        let y0 = ((pixels.y / ts).floor() as u32).min(rows - 1);
        let x1 = ((pixels.right() / ts).ceil() as u32).saturating_sub(1).clamp(x0, cols - 1);
        let y1 = ((pixels.bottom() / ts).ceil() as u32).saturating_sub(1).clamp(y0, rows - 1);

        for y in y0..=y1 {
            for x in x0..=x1 {
                tiles.insert((x, y));
            }
        }
        tiles
    }

    /// Sharpest LOD whose image is still larger than `display`
    ///
    /// Starting from LOD 0 the LOD is increased while the display is
    /// strictly smaller than the next LOD's area in both dimensions. A
    /// display exactly as large as the next LOD keeps the current one.
    pub fn lod_for_display(&self, display: Size) -> u32 {
        let mut lod = 0;
        while lod < self.max_lod {
            let next = self.tiles_area(lod + 1);
            if display.width < next.width && display.height < next.height {
                lod += 1;
            } else {
                break;
            }
        }
        lod
    }

    /// Id of the first (top-left) tile of `lod`
    pub fn first_tile_id(&self, lod: u32) -> TileId {
        let lod = self.clamp(lod);
        TileId(
            ((lod + 1)..=self.max_lod)
                .fold(0u32, |first, l| first.saturating_add(self.tile_count_at(l))),
        )
    }

    pub fn tile_id(&self, index: TileIndex) -> Option<TileId> {
        if index.lod > self.max_lod {
            return None;
        }
        let (cols, rows) = self.tile_grid_size(index.lod);
        if index.x >= cols || index.y >= rows {
            return None;
        }
        let raw = u64::from(self.first_tile_id(index.lod).0)
            + u64::from(index.y) * u64::from(cols)
            + u64::from(index.x);
        u32::try_from(raw).ok().map(TileId)
    }

    pub fn tile_index(&self, id: TileId) -> Option<TileIndex> {
        let id = u64::from(id.0);
        let mut first = 0u64;
        for lod in (0..=self.max_lod).rev() {
            let (cols, rows) = self.tile_grid_size(lod);
            let count = u64::from(cols) * u64::from(rows);
            if id < first.saturating_add(count) {
                let offset = id - first;
                let cols = u64::from(cols);
                return Some(TileIndex::new(lod, (offset % cols) as u32, (offset / cols) as u32));
            }
            first += count;
        }
        None
    }

    /// Ids of the tiles at `lod` overlapping `visible`
    pub fn visible_tile_ids(&self, lod: u32, visible: &RectF) -> BTreeSet<TileId> {
        let lod = self.clamp(lod);
        self.visible_tile_indices(lod, visible)
            .into_iter()
            .filter_map(|(x, y)| self.tile_id(TileIndex::new(lod, x, y)))
            .collect()
    }
}

fn halve(length: u32, times: u32) -> u32 {
    if times >= 32 {
        return 1;
    }
    let divisor = 1u64 << times;
    (u64::from(length).div_ceil(divisor) as u32).max(1)
}
