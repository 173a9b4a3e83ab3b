//! # wall_node
//!
//! The process side of a tiled display wall: configuration, the master's
//! state publisher and the per-node frame loop.
//!
//! ## Architecture
//!
//! ```text
//! WallMaster ──publish──► LocalCluster ──► FrameLoop (rank 0..N)
//!                                              │
//!                                              ├─► ClusterSyncCoordinator
//!                                              ├─► WallScene ──► LodSynchronizer per window
//!                                              ├─► TileFetcher
//!                                              └─► Presenter (headless)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Scene changes on commit only** - nodes never render state the
//!    cluster has not agreed on
//! 2. **Swap after barrier** - no node shows a frame before every node has
//!    drawn it

pub mod config;
pub mod error;
pub mod frame;
pub mod frame_loop;
pub mod master;
pub mod presenter;
pub mod scene;

pub use config::WallConfig;
pub use error::{ConfigError, NodeError, NodeResult};
pub use frame::{FrameScheduler, FrameState};
pub use frame_loop::{FrameLoop, FrameStatus};
pub use master::WallMaster;
pub use presenter::{DrawCommand, FrameRecord, HeadlessPresenter, PresentedFrames, Presenter};
pub use scene::{WallScene, WindowRenderer};
