//! Scene model - the display group and its content windows
//!
//! The master owns the authoritative [`DisplayGroup`]; wall nodes receive
//! copies of it through the sync group and only ever read them.

use crate::geometry::{RectF, Size};
use core::fmt;
use serde::{Deserialize, Serialize};

/// Unique identifier of a content window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowId(u64);

impl WindowId {
    /// Allocate a new process-unique id
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

/// A window showing one piece of content on the wall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentWindow {
    pub id: WindowId,
    /// Content uri, resolved to a tile data source on each node
    pub uri: String,
    /// Full resolution size of the content
    pub content_size: Size,
    /// Window position and size in wall pixels
    pub coordinates: RectF,
    /// Normalized region of the content shown in the window (pan/zoom)
    pub zoom_rect: RectF,
    /// Hidden windows keep their content alive but are not drawn
    pub hidden: bool,
    /// Selected windows get a highlighted border
    pub selected: bool,
}

impl ContentWindow {
    /// Create a window showing the whole content
    pub fn new(uri: impl Into<String>, content_size: Size, coordinates: RectF) -> Self {
        Self {
            id: WindowId::new(),
            uri: uri.into(),
            content_size,
            coordinates,
            zoom_rect: RectF::UNIT,
            hidden: false,
            selected: false,
        }
    }

    /// Rectangle the *whole* content would cover at the current zoom, in wall pixels
    pub fn content_rect(&self) -> RectF {
        let width = self.coordinates.width / self.zoom_rect.width;
        let height = self.coordinates.height / self.zoom_rect.height;
        RectF::new(
            self.coordinates.x - self.zoom_rect.x * width,
            self.coordinates.y - self.zoom_rect.y * height,
            width,
            height,
        )
    }

    /// On-screen size of the whole content, used to pick a level of detail
    pub fn display_size(&self) -> Size {
        let rect = self.content_rect();
        Size::new(rect.width.round().max(0.0) as u32, rect.height.round().max(0.0) as u32)
    }

    /// Normalized content region visible through this window on `screen`
    ///
    /// Returns `None` when the window does not overlap the screen.
    pub fn visible_area(&self, screen: &RectF) -> Option<RectF> {
        if self.zoom_rect.is_empty() {
            return None;
        }
        let visible = self.coordinates.intersected(screen)?;
        Some(visible.normalized_in(&self.content_rect()))
    }
}

/// The set of windows displayed on the wall, back to front
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayGroup {
    /// Wall area covered by the group, in pixels
    pub coordinates: RectF,
    windows: Vec<ContentWindow>,
}

impl DisplayGroup {
    pub fn new(coordinates: RectF) -> Self {
        Self {
            coordinates,
            windows: Vec::new(),
        }
    }

    /// Add a window on top; rejected if a window with the same id exists
    pub fn add_window(&mut self, window: ContentWindow) -> bool {
        if self.window(window.id).is_some() {
            return false;
        }
        self.windows.push(window);
        true
    }

    pub fn remove_window(&mut self, id: WindowId) -> Option<ContentWindow> {
        let index = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(index))
    }

    /// Move a window to the top of the stack
    pub fn move_to_front(&mut self, id: WindowId) -> bool {
        match self.windows.iter().position(|w| w.id == id) {
            Some(index) => {
                let window = self.windows.remove(index);
                self.windows.push(window);
                true
            }
            None => false,
        }
    }

    pub fn window(&self, id: WindowId) -> Option<&ContentWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: WindowId) -> Option<&mut ContentWindow> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    /// Windows from back to front
    pub fn windows(&self) -> &[ContentWindow] {
        &self.windows
    }

    /// The top-most window
    pub fn active_window(&self) -> Option<&ContentWindow> {
        self.windows.last()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> ContentWindow {
        ContentWindow::new(
            "image.pyr",
            Size::new(4096, 4096),
            RectF::new(1000.0, 0.0, 2000.0, 1000.0),
        )
    }

    #[test]
    fn test_content_rect_zoomed() {
        let mut window = window();
        window.zoom_rect = RectF::new(0.25, 0.25, 0.5, 0.5);
        assert_eq!(window.content_rect(), RectF::new(0.0, -500.0, 4000.0, 2000.0));
        assert_eq!(window.display_size(), Size::new(4000, 2000));
    }

    #[test]
    fn test_visible_area_partial_screen() {
        let window = window();
        // Screen covers the right half of the window
        let screen = RectF::new(2000.0, 0.0, 1920.0, 1080.0);
        let visible = window.visible_area(&screen).unwrap();
        assert_eq!(visible, RectF::new(0.5, 0.0, 0.5, 1.0));
    }

    #[test]
    fn test_visible_area_off_screen() {
        let window = window();
        let screen = RectF::new(5000.0, 0.0, 1920.0, 1080.0);
        assert!(window.visible_area(&screen).is_none());
    }

    #[test]
    fn test_display_group_ordering() {
        let mut group = DisplayGroup::new(RectF::new(0.0, 0.0, 3840.0, 2160.0));
        let a = window();
        let b = window();
        let (a_id, b_id) = (a.id, b.id);

        assert!(group.add_window(a.clone()));
        assert!(!group.add_window(a));
        assert!(group.add_window(b));
        assert_eq!(group.active_window().map(|w| w.id), Some(b_id));

        assert!(group.move_to_front(a_id));
        assert_eq!(group.active_window().map(|w| w.id), Some(a_id));

        assert!(group.remove_window(a_id).is_some());
        assert_eq!(group.len(), 1);
    }
}
