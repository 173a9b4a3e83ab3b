//! Wall layout - the grid of physical screens and the mullions between them

use crate::geometry::{RectF, Size};
use serde::{Deserialize, Serialize};

/// Physical arrangement of the screens that make up the wall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WallLayout {
    /// Size of a single screen in pixels
    pub screen_size: Size,
    /// Number of screen columns
    pub screens_x: u32,
    /// Number of screen rows
    pub screens_y: u32,
    /// Width/height of the bezel gap between two screens, in pixels
    pub mullion: Size,
    /// Whether mullions are part of the wall coordinate space
    pub mullion_compensation: bool,
}

impl Default for WallLayout {
    fn default() -> Self {
        Self {
            screen_size: Size::new(1920, 1080),
            screens_x: 1,
            screens_y: 1,
            mullion: Size::new(0, 0),
            mullion_compensation: true,
        }
    }
}

impl WallLayout {
    /// Total number of screens
    pub fn screen_count(&self) -> u32 {
        self.screens_x * self.screens_y
    }

    /// Effective mullion size, zero when compensation is off
    pub fn effective_mullion(&self) -> Size {
        if self.mullion_compensation {
            self.mullion
        } else {
            Size::new(0, 0)
        }
    }

    /// Size of the whole wall in pixels
    pub fn total_size(&self) -> Size {
        let mullion = self.effective_mullion();
        Size::new(
            self.screens_x * self.screen_size.width
                + self.screens_x.saturating_sub(1) * mullion.width,
            self.screens_y * self.screen_size.height
                + self.screens_y.saturating_sub(1) * mullion.height,
        )
    }

    /// The whole wall as a rectangle
    pub fn wall_rect(&self) -> RectF {
        let total = self.total_size();
        RectF::new(0.0, 0.0, total.width as f64, total.height as f64)
    }

    /// Grid position of the screen driven by a node of the given rank
    pub fn screen_position(&self, rank: usize) -> (u32, u32) {
        let cols = self.screens_x.max(1) as usize;
        ((rank % cols) as u32, (rank / cols) as u32)
    }

    /// Rectangle covered by one screen, in wall pixels
    pub fn screen_rect(&self, column: u32, row: u32) -> RectF {
        let mullion = self.effective_mullion();
        let x = column as f64 * (self.screen_size.width + mullion.width) as f64;
        let y = row as f64 * (self.screen_size.height + mullion.height) as f64;
        RectF::new(
            x,
            y,
            self.screen_size.width as f64,
            self.screen_size.height as f64,
        )
    }
}
