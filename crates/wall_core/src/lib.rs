//! # wall_core
//!
//! Shared primitives for every process of a tiled display wall:
//! - Geometry in wall pixels and normalized content space
//! - The scene model replicated to all nodes (windows, options, markers)
//! - Wall layout (screen grid and mullions)
//!
//! Everything in here is plain data. The types are `Serialize` so they can be
//! carried as versioned values through the cluster synchronization protocol.

pub mod geometry;
pub mod layout;
pub mod marker;
pub mod options;
pub mod scene;
pub mod stream;

pub use geometry::{PointF, Rect, RectF, Size};
pub use layout::WallLayout;
pub use marker::{Marker, Markers, MARKER_ACTIVE_SECS};
pub use options::{Color, Options};
pub use scene::{ContentWindow, DisplayGroup, WindowId};
pub use stream::StreamFrames;

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::geometry::{PointF, Rect, RectF, Size};
    pub use crate::layout::WallLayout;
    pub use crate::scene::{ContentWindow, DisplayGroup, WindowId};
}
