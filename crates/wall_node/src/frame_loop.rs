//! Per-node frame loop
//!
//! One iteration of [`FrameLoop::run_frame`]:
//!
//! ```text
//! receive messages ──► apply as local updates
//!        │
//!        ▼
//! synchronize clock ──► sync round (version check, then confirmation per value)
//!        │                    │
//!        │                    └──► commit: scene picks up new state
//!        ▼
//! deliver fetched tiles ──► update LOD / request tiles ──► render
//!        │
//!        ▼
//! swap barrier ──► swap buffers ──► release stale sources
//! ```
//!
//! Every node performs the same collective calls in the same order. When the
//! quit flag commits, all nodes see it in the same frame, meet at a final
//! barrier and stop without rendering.

use crate::config::WallConfig;
use crate::error::NodeResult;
use crate::frame::{FrameScheduler, FrameState};
use crate::presenter::Presenter;
use crate::scene::WallScene;
use std::time::Instant;
use wall_core::DisplayGroup;
use wall_sync::{ClusterSyncCoordinator, SyncStats, WallChannel, WallSyncGroup};
use wall_tiles::{DataSourceFactory, TileFetcher};

/// Outcome of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Continue,
    Quit,
}

/// The frame loop of one wall node
pub struct FrameLoop<C: WallChannel, P: Presenter> {
    coordinator: ClusterSyncCoordinator<C>,
    group: WallSyncGroup,
    scene: WallScene,
    factory: DataSourceFactory,
    fetcher: TileFetcher,
    presenter: P,
    scheduler: FrameScheduler,
    epoch: Instant,
    stale_source_frames: u64,
}

impl<C: WallChannel, P: Presenter> FrameLoop<C, P> {
    /// `epoch` is the instant the master's clock counts from
    pub fn new(channel: C, presenter: P, config: &WallConfig, epoch: Instant) -> NodeResult<Self> {
        let rank = channel.rank();
        let layout = config.layout();
        let options = config.options();

        let group = WallSyncGroup::with_max_pending(
            DisplayGroup::new(layout.wall_rect()),
            options.clone(),
            config.cluster.max_pending_versions,
        );
        let scene = WallScene::new(rank, layout, options);
        log::info!("Node {}/{} renders {:?}", rank, channel.size(), scene.screen());

        Ok(Self {
            coordinator: ClusterSyncCoordinator::new(channel),
            group,
            scene,
            factory: config.data_source_factory(),
            fetcher: TileFetcher::new(config.tiles.fetch_threads)?,
            presenter,
            scheduler: FrameScheduler::new(config.render.target_fps),
            epoch,
            stale_source_frames: config.render.stale_source_frames,
        })
    }

    pub fn rank(&self) -> usize {
        self.coordinator.channel().rank()
    }

    pub fn scene(&self) -> &WallScene {
        &self.scene
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.coordinator.stats()
    }

    pub fn factory(&self) -> &DataSourceFactory {
        &self.factory
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    /// Run one frame
    ///
    /// Errors are fatal for the whole cluster: the other nodes will fail
    /// their next collective call.
    pub fn run_frame(&mut self) -> NodeResult<FrameStatus> {
        let frame = self.scheduler.begin_frame();

        for message in self.coordinator.receive_messages()? {
            self.group.apply(message);
        }

        let now = self
            .coordinator
            .synchronize_clock(self.epoch.elapsed().as_secs_f64())?;

        let scene = &mut self.scene;
        let factory = &self.factory;
        self.coordinator.synchronize(&mut self.group, |group, report| {
            log::debug!("Node {} frame {}: committed {:?}", scene.rank(), frame, report.committed);
            if let Some(display_group) = group.display_group.take_committed() {
                scene.apply_display_group(display_group, factory, frame);
            }
            if let Some(options) = group.options.take_committed() {
                scene.apply_options(options.clone());
            }
            if let Some(markers) = group.markers.take_committed() {
                scene.apply_markers(markers.clone());
            }
            if let Some(frames) = group.stream_frames.take_committed() {
                scene.apply_stream_frames(frames.clone());
            }
        })?;

        if self.group.should_quit() {
            self.coordinator.barrier()?;
            log::info!("Node {} stopping after {} frames", self.rank(), frame - 1);
            return Ok(FrameStatus::Quit);
        }

        self.scheduler.set_state(FrameState::Rendering);
        self.scene.deliver(self.fetcher.drain());
        for request in self.scene.update_tiles(now) {
            self.fetcher.request(request);
        }

        let overlay = self.scene.options().show_statistics.then(|| self.scheduler.statistics());
        self.scene
            .render(&mut self.presenter, frame, now, overlay.as_deref())?;

        self.scheduler.set_state(FrameState::WaitingForSwap);
        self.coordinator.barrier()?;
        self.presenter.swap_buffers()?;
        self.scheduler.end_frame();

        self.scene.touch_sources(&self.factory, frame);
        let dropped = self.factory.clear_stale(frame, self.stale_source_frames);
        if dropped > 0 {
            log::debug!("Node {}: released {} unused sources", self.rank(), dropped);
        }

        self.log_statistics(frame);
        self.scheduler.pace();
        Ok(FrameStatus::Continue)
    }

    fn log_statistics(&self, frame: u64) {
        if !self.scene.options().show_statistics {
            return;
        }
        let interval = u64::from(self.scheduler.target_fps().max(1));
        if frame % interval != 0 {
            return;
        }
        let stats = self.coordinator.stats();
        log::info!(
            "Node {}: {} | sync rounds {} commits {} aborted {} | {} sources, {} tiles queued{}",
            self.rank(),
            self.scheduler.statistics(),
            stats.rounds,
            stats.commits,
            stats.aborted,
            self.factory.len(),
            self.fetcher.queued(),
            if self.scheduler.hitting_target() { "" } else { " (behind target)" }
        );
    }

    /// Run until quit, or for `max_frames` frames when non-zero
    ///
    /// Returns the number of frames rendered.
    pub fn run(&mut self, max_frames: u64) -> NodeResult<u64> {
        let mut rendered = 0;
        while max_frames == 0 || rendered < max_frames {
            match self.run_frame()? {
                FrameStatus::Continue => rendered += 1,
                FrameStatus::Quit => break,
            }
        }
        Ok(rendered)
    }
}
