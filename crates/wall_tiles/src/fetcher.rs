//! Background tile fetching
//!
//! The render thread must not block on decoding or rasterization. A
//! [`TileFetcher`] runs a small pool of named worker threads fed through a
//! crossbeam channel; finished tiles come back on a second channel and are
//! drained once per frame. Requests hold the source weakly: if the source is
//! dropped before a worker gets to it, the result carries no image.

use crate::error::TileResult;
use crate::lod::TileId;
use crate::source::{TileDataSource, TileImage};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use wall_core::WindowId;

/// One tile to load for one window
#[derive(Clone)]
pub struct TileRequest {
    pub window: WindowId,
    pub source: Weak<dyn TileDataSource>,
    pub tile: TileId,
    pub timestamp: f64,
}

impl TileRequest {
    pub fn new(window: WindowId, source: &Arc<dyn TileDataSource>, tile: TileId, timestamp: f64) -> Self {
        Self {
            window,
            source: Arc::downgrade(source),
            tile,
            timestamp,
        }
    }
}

/// A finished request, `image` is `None` when the tile is unavailable
#[derive(Clone)]
pub struct FetchedTile {
    pub window: WindowId,
    pub tile: TileId,
    pub image: Option<TileImage>,
}

/// Pool of tile loading threads
pub struct TileFetcher {
    requests: Option<Sender<TileRequest>>,
    results: Receiver<FetchedTile>,
    workers: Vec<JoinHandle<()>>,
}

impl TileFetcher {
    /// Start `threads` workers (at least one)
    pub fn new(threads: usize) -> TileResult<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<TileRequest>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<FetchedTile>();

        let mut workers = Vec::new();
        for n in 0..threads.max(1) {
            let requests = request_rx.clone();
            let results = result_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("tile-fetch-{}", n))
                .spawn(move || Self::worker_loop(requests, results))?;
            workers.push(handle);
        }

        log::debug!("Started {} tile fetch workers", workers.len());
        Ok(Self {
            requests: Some(request_tx),
            results: result_rx,
            workers,
        })
    }

    fn worker_loop(requests: Receiver<TileRequest>, results: Sender<FetchedTile>) {
        for request in requests {
            let image = match request.source.upgrade() {
                Some(source) => match source.tile_image(request.tile, request.timestamp) {
                    Ok(image) => Some(image),
                    Err(err) => {
                        log::warn!("{}: tile {} failed: {}", source.uri(), request.tile, err);
                        None
                    }
                },
                None => None,
            };

            let fetched = FetchedTile {
                window: request.window,
                tile: request.tile,
                image,
            };
            if results.send(fetched).is_err() {
                break;
            }
        }
    }

    /// Queue a request; never blocks
    pub fn request(&self, request: TileRequest) {
        if let Some(requests) = &self.requests {
            if requests.send(request).is_err() {
                log::warn!("Tile fetch workers are gone");
            }
        }
    }

    /// Results finished since the last call
    pub fn drain(&self) -> Vec<FetchedTile> {
        self.results.try_iter().collect()
    }

    /// Requests not yet picked up by a worker
    pub fn queued(&self) -> usize {
        self.requests.as_ref().map_or(0, |requests| requests.len())
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for TileFetcher {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loops
        self.requests.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
