//! Tile cache
//!
//! The cache is shared between the render thread and the fetch workers.
//! Readers use [`TileCache::get`], which never waits: a tile that is missing
//! or still loading is simply not there yet. Loaders go through
//! [`TileCache::get_or_load`], which runs at most one load per tile at a
//! time; concurrent callers for the same tile wait for that load and reuse
//! its result.

use crate::error::TileResult;
use crate::lod::TileId;
use crate::source::TileImage;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;

/// Decides which tiles leave the cache
pub trait EvictionPolicy: Send + Sync {
    /// Tiles to drop, given the resident tiles least recently used first
    fn evict(&self, lru_order: &[TileId]) -> Vec<TileId>;
}

/// Keep everything
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn evict(&self, _lru_order: &[TileId]) -> Vec<TileId> {
        Vec::new()
    }
}

/// Keep at most N tiles, dropping the least recently used
#[derive(Debug, Clone, Copy)]
pub struct MaxTiles(pub usize);

impl EvictionPolicy for MaxTiles {
    fn evict(&self, lru_order: &[TileId]) -> Vec<TileId> {
        let excess = lru_order.len().saturating_sub(self.0);
        lru_order[..excess].to_vec()
    }
}

enum Slot {
    Loading,
    Ready { image: TileImage, last_used: u64 },
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<TileId, Slot>,
    tick: u64,
    stats: CacheStats,
}

impl CacheState {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn ready(&mut self, tile: TileId) -> Option<TileImage> {
        let tick = self.touch();
        match self.slots.get_mut(&tile) {
            Some(Slot::Ready { image, last_used }) => {
                *last_used = tick;
                Some(image.clone())
            }
            _ => None,
        }
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub failures: u64,
    pub evictions: u64,
}

/// Tile images keyed by tile id
pub struct TileCache {
    state: Mutex<CacheState>,
    loaded: Condvar,
    policy: Box<dyn EvictionPolicy>,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    /// Unbounded cache
    pub fn new() -> Self {
        Self::with_policy(Unbounded)
    }

    pub fn with_policy(policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            loaded: Condvar::new(),
            policy: Box::new(policy),
        }
    }

    /// Resident tile, without waiting for in-flight loads
    pub fn get(&self, tile: TileId) -> Option<TileImage> {
        let mut state = self.state.lock();
        let image = state.ready(tile);
        if image.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        image
    }

    /// Resident tile, or the result of `load`
    ///
    /// Only one caller loads a given tile at a time. A failed load leaves
    /// nothing behind, the next caller tries again.
    pub fn get_or_load<F>(&self, tile: TileId, load: F) -> TileResult<TileImage>
    where
        F: FnOnce() -> TileResult<TileImage>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if let Some(image) = state.ready(tile) {
                    state.stats.hits += 1;
                    return Ok(image);
                }
                if state.slots.contains_key(&tile) {
                    self.loaded.wait(&mut state);
                    continue;
                }
                state.stats.misses += 1;
                state.slots.insert(tile, Slot::Loading);
                break;
            }
        }

        let guard = LoadingGuard {
            cache: self,
            tile,
            armed: true,
        };
        let result = load();
        guard.finish(&result);
        result
    }

    /// Store a tile produced elsewhere
    pub fn insert(&self, tile: TileId, image: TileImage) {
        let mut state = self.state.lock();
        let last_used = state.touch();
        state.slots.insert(tile, Slot::Ready { image, last_used });
        self.evict(&mut state);
        self.loaded.notify_all();
    }

    pub fn remove(&self, tile: TileId) -> Option<TileImage> {
        let mut state = self.state.lock();
        match state.slots.remove(&tile) {
            Some(Slot::Ready { image, .. }) => Some(image),
            Some(Slot::Loading) => {
                // Keep the marker, the loader still owns it
                state.slots.insert(tile, Slot::Loading);
                None
            }
            None => None,
        }
    }

    /// Drop every resident tile; loads in flight complete normally
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state
            .slots
            .retain(|_, slot| matches!(slot, Slot::Loading));
    }

    pub fn contains(&self, tile: TileId) -> bool {
        matches!(self.state.lock().slots.get(&tile), Some(Slot::Ready { .. }))
    }

    /// Number of resident tiles
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .slots
            .values()
            .filter(|slot| matches!(slot, Slot::Ready { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    fn evict(&self, state: &mut CacheState) {
        let mut resident: Vec<(u64, TileId)> = state
            .slots
            .iter()
            .filter_map(|(tile, slot)| match slot {
                Slot::Ready { last_used, .. } => Some((*last_used, *tile)),
                Slot::Loading => None,
            })
            .collect();
        resident.sort_unstable();
        let order: Vec<TileId> = resident.into_iter().map(|(_, tile)| tile).collect();

        for tile in self.policy.evict(&order) {
            if state.slots.remove(&tile).is_some() {
                state.stats.evictions += 1;
            }
        }
    }
}

/// Clears the loading marker if the loader unwinds
struct LoadingGuard<'a> {
    cache: &'a TileCache,
    tile: TileId,
    armed: bool,
}

impl LoadingGuard<'_> {
    fn finish(mut self, result: &TileResult<TileImage>) {
        let mut state = self.cache.state.lock();
        match result {
            Ok(image) => {
                let last_used = state.touch();
                state.slots.insert(
                    self.tile,
                    Slot::Ready {
                        image: image.clone(),
                        last_used,
                    },
                );
                state.stats.loads += 1;
                self.cache.evict(&mut state);
            }
            Err(_) => {
                state.slots.remove(&self.tile);
                state.stats.failures += 1;
            }
        }
        self.armed = false;
        self.cache.loaded.notify_all();
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.cache.state.lock();
            state.slots.remove(&self.tile);
            self.cache.loaded.notify_all();
        }
    }
}
