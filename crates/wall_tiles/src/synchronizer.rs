//! Per-window LOD synchronization
//!
//! A [`LodSynchronizer`] follows one window's footprint on a screen. Each
//! frame it picks the LOD for the window's displayed size, computes the
//! visible tiles at that LOD and, when either changed, reports which tiles
//! to request and which resident tiles to drop. Tile images arrive later,
//! from whatever thread loaded them, through [`LodSynchronizer::on_tile_loaded`].
//!
//! A tile that failed to load is requested again on the next update, even
//! when nothing else changed. Every further failure doubles the number of
//! updates it waits before the next attempt, up to [`MAX_RETRY_INTERVAL`].

use crate::lod::TileId;
use crate::source::{TileDataSource, TileImage};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use wall_core::{RectF, Size};

/// Most updates a repeatedly failing tile waits between two attempts
pub const MAX_RETRY_INTERVAL: u32 = 64;

/// Retry schedule of one failed tile
#[derive(Debug, Clone, Copy)]
struct Retry {
    failures: u32,
    /// Updates left before the next attempt
    wait: u32,
}

impl Retry {
    fn after_failure(failures: u32) -> Self {
        let interval = 1u32
            .checked_shl(failures.saturating_sub(1))
            .unwrap_or(MAX_RETRY_INTERVAL)
            .min(MAX_RETRY_INTERVAL);
        Self {
            failures,
            wait: interval - 1,
        }
    }
}

/// Where the synchronizer is in its update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodState {
    /// Every visible tile is resident
    Idle,
    /// Recomputing LOD and visible tiles
    ComputingVisibility,
    /// Waiting for requested tiles
    AwaitingTiles,
}

/// Work produced by a visibility change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileRefresh {
    pub lod: u32,
    /// Tiles to load, not resident and not already requested
    pub requested: Vec<TileId>,
    /// Resident tiles no longer visible, already dropped
    pub released: Vec<TileId>,
}

/// Keeps one window's visible tiles in step with its viewport
pub struct LodSynchronizer {
    source: Arc<dyn TileDataSource>,
    state: LodState,
    lod: Option<u32>,
    visible: Arc<BTreeSet<TileId>>,
    resident: HashMap<TileId, TileImage>,
    pending: BTreeSet<TileId>,
    failed: HashMap<TileId, Retry>,
}

impl LodSynchronizer {
    pub fn new(source: Arc<dyn TileDataSource>) -> Self {
        Self {
            source,
            state: LodState::Idle,
            lod: None,
            visible: Arc::new(BTreeSet::new()),
            resident: HashMap::new(),
            pending: BTreeSet::new(),
            failed: HashMap::new(),
        }
    }

    pub fn source(&self) -> &Arc<dyn TileDataSource> {
        &self.source
    }

    pub fn state(&self) -> LodState {
        self.state
    }

    /// Current LOD, `None` before the first update
    pub fn lod(&self) -> Option<u32> {
        self.lod
    }

    /// Current visible tile set
    ///
    /// The set is replaced on every change and never modified in place, so a
    /// clone of the `Arc` stays a consistent snapshot.
    pub fn visible_tiles(&self) -> Arc<BTreeSet<TileId>> {
        Arc::clone(&self.visible)
    }

    /// Recompute LOD and visible tiles
    ///
    /// `display_size` is the size in screen pixels the whole content would
    /// have at the window's current zoom; `visible_area` is the normalized
    /// part of the content shown. Returns `None` when nothing changed and no
    /// failed tile is due for another attempt.
    pub fn update(&mut self, display_size: Size, visible_area: &RectF) -> Option<TileRefresh> {
        self.state = LodState::ComputingVisibility;

        let lod = self.source.lod_tools().lod_for_display(display_size);
        let tiles = self.source.compute_visible_set(visible_area, lod);

        if self.lod == Some(lod) && tiles == *self.visible {
            let retried = self.due_retries();
            self.settle();
            if retried.is_empty() {
                return None;
            }
            log::debug!("{}: retrying {} failed tiles", self.source.uri(), retried.len());
            return Some(TileRefresh {
                lod,
                requested: retried,
                released: Vec::new(),
            });
        }

        if self.lod != Some(lod) {
            log::debug!(
                "{}: LOD {} for display {} ({} tiles)",
                self.source.uri(),
                lod,
                display_size,
                tiles.len()
            );
        }

        let released: Vec<TileId> = self
            .resident
            .keys()
            .filter(|tile| !tiles.contains(*tile))
            .copied()
            .collect();
        for tile in &released {
            self.resident.remove(tile);
        }
        self.pending.retain(|tile| tiles.contains(tile));
        self.failed.retain(|tile, _| tiles.contains(tile));

        let requested: Vec<TileId> = tiles
            .iter()
            .filter(|tile| !self.resident.contains_key(*tile) && !self.pending.contains(*tile))
            .copied()
            .collect();
        self.pending.extend(requested.iter().copied());

        self.lod = Some(lod);
        self.visible = Arc::new(tiles);
        self.settle();

        Some(TileRefresh {
            lod,
            requested,
            released,
        })
    }

    /// Failed tiles whose wait is over, now marked pending
    fn due_retries(&mut self) -> Vec<TileId> {
        let mut due = Vec::new();
        for (tile, retry) in self.failed.iter_mut() {
            if self.pending.contains(tile) || self.resident.contains_key(tile) {
                continue;
            }
            if retry.wait == 0 {
                due.push(*tile);
            } else {
                retry.wait -= 1;
            }
        }
        due.sort_unstable();
        self.pending.extend(due.iter().copied());
        due
    }

    fn settle(&mut self) {
        self.state = if self.pending.is_empty() {
            LodState::Idle
        } else {
            LodState::AwaitingTiles
        };
    }

    /// Deliver a loaded tile; returns false if it is no longer visible
    pub fn on_tile_loaded(&mut self, tile: TileId, image: TileImage) -> bool {
        self.pending.remove(&tile);
        let accepted = self.visible.contains(&tile);
        if accepted {
            self.failed.remove(&tile);
            self.resident.insert(tile, image);
        }
        self.settle();
        accepted
    }

    /// A requested tile could not be produced
    ///
    /// The tile stays missing until its next attempt, on a later update.
    pub fn on_tile_failed(&mut self, tile: TileId) {
        self.pending.remove(&tile);
        if self.visible.contains(&tile) {
            let failures = self.failed.get(&tile).map_or(0, |retry| retry.failures) + 1;
            self.failed.insert(tile, Retry::after_failure(failures));
        }
        self.settle();
    }

    /// Resident image of a visible tile
    pub fn resident_tile(&self, tile: TileId) -> Option<TileImage> {
        self.resident.get(&tile).cloned()
    }

    /// Visible tiles with their images, missing ones as `None`
    pub fn tiles(&self) -> impl Iterator<Item = (TileId, Option<TileImage>)> + '_ {
        self.visible
            .iter()
            .map(move |tile| (*tile, self.resident.get(tile).cloned()))
    }

    /// Visible tiles not yet resident nor requested
    pub fn missing_tiles(&self) -> Vec<TileId> {
        self.visible
            .iter()
            .filter(|tile| !self.resident.contains_key(*tile) && !self.pending.contains(*tile))
            .copied()
            .collect()
    }

    /// Load a tile from the source
    ///
    /// A tile the source cannot produce is `None`, it is not yet available.
    pub fn tile_image(&self, tile: TileId, timestamp: f64) -> Option<TileImage> {
        match self.source.tile_image(tile, timestamp) {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("{}: tile {} unavailable: {}", self.source.uri(), tile, err);
                None
            }
        }
    }

    /// One line summary, `LOD:  <lod>/<max>  res: <w>x<h>`
    pub fn statistics(&self) -> String {
        let lod = self.lod.unwrap_or(0);
        let area = self.source.tiles_area(lod);
        format!(
            "LOD:  {}/{}  res: {}x{}",
            lod,
            self.source.max_lod(),
            area.width,
            area.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentTiler, TestPattern};
    use crate::lod::TileIndex;
    use image::RgbaImage;

    fn synchronizer() -> LodSynchronizer {
        let tiler = DocumentTiler::with_scale("page", TestPattern::new(Size::new(4096, 4096)), 1.0, 512);
        LodSynchronizer::new(Arc::new(tiler))
    }

    fn blank() -> TileImage {
        Arc::new(RgbaImage::new(1, 1))
    }

    #[test]
    fn test_first_update_requests_visible_tiles() {
        let mut sync = synchronizer();
        let refresh = sync
            .update(Size::new(600, 600), &RectF::new(0.45, 0.45, 0.1, 0.1))
            .unwrap();
        assert_eq!(refresh.lod, 2);
        assert_eq!(refresh.requested.len(), 4);
        assert!(refresh.released.is_empty());
        assert_eq!(sync.state(), LodState::AwaitingTiles);
    }

    #[test]
    fn test_unchanged_update_is_noop() {
        let mut sync = synchronizer();
        let area = RectF::new(0.5, 0.5, 0.1, 0.1);
        assert!(sync.update(Size::new(600, 600), &area).is_some());
        let snapshot = sync.visible_tiles();
        assert!(sync.update(Size::new(600, 600), &area).is_none());
        assert!(Arc::ptr_eq(&snapshot, &sync.visible_tiles()));
        // Same LOD, area moved within the same tile
        assert!(sync.update(Size::new(610, 610), &RectF::new(0.52, 0.52, 0.05, 0.05)).is_none());
    }

    #[test]
    fn test_resident_tiles_not_refetched() {
        let mut sync = synchronizer();
        let refresh = sync
            .update(Size::new(600, 600), &RectF::new(0.5, 0.5, 0.1, 0.1))
            .unwrap();
        for tile in &refresh.requested {
            assert!(sync.on_tile_loaded(*tile, blank()));
        }
        assert_eq!(sync.state(), LodState::Idle);

        // Grow the area over the tile boundary: only new tiles are requested
        let refresh = sync
            .update(Size::new(600, 600), &RectF::new(0.45, 0.45, 0.15, 0.15))
            .unwrap();
        assert_eq!(refresh.requested.len(), 3);
        assert!(refresh.released.is_empty());
        let kept = sync.source().lod_tools().tile_id(TileIndex::new(2, 1, 1)).unwrap();
        assert!(!refresh.requested.contains(&kept));
        assert!(sync.resident_tile(kept).is_some());
    }

    #[test]
    fn test_lod_change_releases_old_tiles() {
        let mut sync = synchronizer();
        let refresh = sync.update(Size::new(600, 600), &RectF::UNIT).unwrap();
        for tile in &refresh.requested {
            sync.on_tile_loaded(*tile, blank());
        }

        let refresh = sync.update(Size::new(100, 100), &RectF::UNIT).unwrap();
        assert_eq!(refresh.lod, 3);
        assert_eq!(refresh.released.len(), 4);
        assert_eq!(refresh.requested, vec![TileId::ROOT]);
    }

    #[test]
    fn test_stale_tile_discarded() {
        let mut sync = synchronizer();
        let first = sync.update(Size::new(600, 600), &RectF::new(0.0, 0.0, 0.1, 0.1)).unwrap();
        sync.update(Size::new(600, 600), &RectF::new(0.9, 0.9, 0.1, 0.1)).unwrap();

        assert!(!sync.on_tile_loaded(first.requested[0], blank()));
        assert!(sync.resident_tile(first.requested[0]).is_none());
    }

    #[test]
    fn test_failed_tile_requested_again_on_change() {
        let mut sync = synchronizer();
        let refresh = sync.update(Size::new(600, 600), &RectF::new(0.5, 0.5, 0.1, 0.1)).unwrap();
        let tile = refresh.requested[0];
        sync.on_tile_failed(tile);
        assert_eq!(sync.missing_tiles(), vec![tile]);
        assert_eq!(sync.tiles().next(), Some((tile, None)));

        let refresh = sync.update(Size::new(600, 600), &RectF::new(0.5, 0.45, 0.1, 0.1)).unwrap();
        assert!(refresh.requested.contains(&tile));
    }

    #[test]
    fn test_failed_tile_retried_without_viewport_change() {
        let mut sync = synchronizer();
        let area = RectF::new(0.5, 0.5, 0.1, 0.1);
        let refresh = sync.update(Size::new(600, 600), &area).unwrap();
        let tile = refresh.requested[0];
        sync.on_tile_failed(tile);

        let retry = sync.update(Size::new(600, 600), &area).unwrap();
        assert_eq!(retry.requested, vec![tile]);
        assert!(retry.released.is_empty());
        assert_eq!(sync.state(), LodState::AwaitingTiles);

        // Already requested again: nothing more until it answers
        assert!(sync.update(Size::new(600, 600), &area).is_none());

        assert!(sync.on_tile_loaded(tile, blank()));
        assert_eq!(sync.state(), LodState::Idle);
        assert!(sync.update(Size::new(600, 600), &area).is_none());
    }

    #[test]
    fn test_repeated_failures_back_off() {
        let mut sync = synchronizer();
        let area = RectF::new(0.5, 0.5, 0.1, 0.1);
        let tile = sync.update(Size::new(600, 600), &area).unwrap().requested[0];

        // Updates between two attempts grow 0, 1, 3, 7 after each failure
        let mut waits = Vec::new();
        for _ in 0..4 {
            sync.on_tile_failed(tile);
            let mut skipped = 0;
            while sync.update(Size::new(600, 600), &area).is_none() {
                skipped += 1;
                assert!(skipped <= MAX_RETRY_INTERVAL);
            }
            waits.push(skipped);
        }
        assert_eq!(waits, vec![0, 1, 3, 7]);
    }

    #[test]
    fn test_retry_interval_is_capped() {
        assert_eq!(Retry::after_failure(1).wait, 0);
        assert_eq!(Retry::after_failure(7).wait, MAX_RETRY_INTERVAL - 1);
        assert_eq!(Retry::after_failure(40).wait, MAX_RETRY_INTERVAL - 1);
    }

    #[test]
    fn test_tile_image_out_of_range_is_none() {
        let sync = synchronizer();
        assert!(sync.tile_image(TileId(100_000), 0.0).is_none());
        assert!(sync.tile_image(TileId::ROOT, 0.0).is_some());
    }

    #[test]
    fn test_statistics() {
        let mut sync = synchronizer();
        sync.update(Size::new(600, 600), &RectF::UNIT);
        assert_eq!(sync.statistics(), "LOD:  2/3  res: 1024x1024");
    }
}
