//! Geometry primitives
//!
//! Integer types are used for pixel grids (tile areas, tile rectangles),
//! floating point types for wall coordinates and normalized content space.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Size in pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True if either dimension is zero
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Component-wise `<=`
    #[inline]
    pub const fn fits_in(&self, other: Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Area in pixels
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle (origin at top-left)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[inline]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn to_rectf(&self) -> RectF {
        RectF::new(self.x as f64, self.y as f64, self.width as f64, self.height as f64)
    }
}

/// Point in floating point coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointF {
    pub x: f64,
    pub y: f64,
}

impl PointF {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Floating point rectangle
///
/// Used both for wall coordinates (pixels) and normalized content space
/// where the full content is `(0, 0, 1, 1)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl RectF {
    /// The full normalized area
    pub const UNIT: RectF = RectF::new(0.0, 0.0, 1.0, 1.0);

    #[inline]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    #[inline]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// A rectangle is empty when it has no positive area
    #[inline]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    pub fn contains(&self, point: PointF) -> bool {
        point.x >= self.x && point.x < self.right() && point.y >= self.y && point.y < self.bottom()
    }

    /// Intersection of two rectangles, `None` when it has no positive area
    pub fn intersected(&self, other: &RectF) -> Option<RectF> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        let rect = RectF::new(x, y, right - x, bottom - y);
        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    /// Scale position and size independently along each axis
    pub fn scaled(&self, sx: f64, sy: f64) -> RectF {
        RectF::new(self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Express `self` relative to `frame`, where `frame` maps to `(0, 0, 1, 1)`
    pub fn normalized_in(&self, frame: &RectF) -> RectF {
        RectF::new(
            (self.x - frame.x) / frame.width,
            (self.y - frame.y) / frame.height,
            self.width / frame.width,
            self.height / frame.height,
        )
    }

    pub fn center(&self) -> PointF {
        PointF::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}
