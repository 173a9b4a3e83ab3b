//! Presenter abstraction
//!
//! The frame loop draws through a [`Presenter`]: clear, draw the visible
//! tiles and overlays, then swap once the cluster barrier says every node is
//! ready. All positions are in screen pixels of the node's own screen.
//!
//! [`HeadlessPresenter`] draws nothing to a display. It records the draw
//! commands of every frame and can composite the tiles into an in-memory
//! framebuffer, which is what tests and the headless binary use.

use crate::error::{NodeError, NodeResult};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use wall_core::{Color, PointF, RectF, Size, WindowId};
use wall_tiles::{TileId, TileImage};

/// Draw target of one wall node
pub trait Presenter: Send {
    /// Size of the node's screen in pixels
    fn screen_size(&self) -> Size;

    /// Start drawing frame `frame`, cleared to `background`
    fn begin_frame(&mut self, frame: u64, background: Color) -> NodeResult<()>;

    /// Draw a tile stretched over `target`, clipped to `clip`
    fn draw_tile(
        &mut self,
        window: WindowId,
        tile: TileId,
        target: RectF,
        clip: RectF,
        image: &TileImage,
    ) -> NodeResult<()>;

    /// Outline of a window
    fn draw_border(&mut self, window: WindowId, rect: RectF, selected: bool) -> NodeResult<()>;

    /// Touch point marker centered at `position`
    fn draw_marker(&mut self, id: u32, position: PointF) -> NodeResult<()>;

    /// Statistics text anchored at `position`
    fn draw_text(&mut self, position: PointF, text: &str) -> NodeResult<()>;

    /// Replace the frame by a test pattern identifying the screen
    fn draw_test_pattern(&mut self, label: &str) -> NodeResult<()>;

    /// Show the finished frame
    fn swap_buffers(&mut self) -> NodeResult<()>;
}

/// One recorded draw call
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Tile {
        window: WindowId,
        tile: TileId,
        target: RectF,
        clip: RectF,
    },
    Border {
        window: WindowId,
        rect: RectF,
        selected: bool,
    },
    Marker {
        id: u32,
        position: PointF,
    },
    Text {
        position: PointF,
        text: String,
    },
    TestPattern {
        label: String,
    },
}

/// Draw calls of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub frame: u64,
    pub background: Color,
    pub commands: Vec<DrawCommand>,
}

impl FrameRecord {
    /// Tiles drawn for `window`
    pub fn tiles_of(&self, window: WindowId) -> Vec<TileId> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Tile { window: w, tile, .. } if *w == window => Some(*tile),
                _ => None,
            })
            .collect()
    }

    pub fn markers(&self) -> Vec<u32> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Marker { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn texts(&self) -> Vec<&str> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                DrawCommand::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn has_test_pattern(&self) -> bool {
        self.commands
            .iter()
            .any(|command| matches!(command, DrawCommand::TestPattern { .. }))
    }
}

#[derive(Debug, Default)]
struct Presented {
    frames: u64,
    last: Option<FrameRecord>,
    framebuffer: Option<RgbaImage>,
}

/// Read access to what a [`HeadlessPresenter`] swapped
///
/// Cloned handles stay valid after the presenter moved into a frame loop
/// thread.
#[derive(Debug, Clone, Default)]
pub struct PresentedFrames {
    inner: Arc<Mutex<Presented>>,
}

impl PresentedFrames {
    /// Number of swapped frames
    pub fn count(&self) -> u64 {
        self.inner.lock().frames
    }

    /// Draw calls of the last swapped frame
    pub fn last_frame(&self) -> Option<FrameRecord> {
        self.inner.lock().last.clone()
    }

    /// Composited image of the last swapped frame, if compositing is on
    pub fn framebuffer(&self) -> Option<RgbaImage> {
        self.inner.lock().framebuffer.clone()
    }
}

/// Presenter without a display
pub struct HeadlessPresenter {
    screen_size: Size,
    composite: bool,
    current: Option<FrameRecord>,
    framebuffer: Option<RgbaImage>,
    presented: PresentedFrames,
}

impl HeadlessPresenter {
    /// Record draw calls only
    pub fn new(screen_size: Size) -> Self {
        Self {
            screen_size,
            composite: false,
            current: None,
            framebuffer: None,
            presented: PresentedFrames::default(),
        }
    }

    /// Also composite tiles into a framebuffer
    pub fn with_framebuffer(mut self) -> Self {
        self.composite = true;
        self
    }

    /// Handle on the swapped frames
    pub fn presented(&self) -> PresentedFrames {
        self.presented.clone()
    }

    fn record(&mut self, command: DrawCommand) -> NodeResult<()> {
        let frame = self
            .current
            .as_mut()
            .ok_or_else(|| NodeError::Presenter("draw call outside a frame".into()))?;
        frame.commands.push(command);
        Ok(())
    }

    fn screen_rect(&self) -> RectF {
        RectF::new(0.0, 0.0, self.screen_size.width as f64, self.screen_size.height as f64)
    }

    fn composite_tile(&mut self, target: RectF, clip: RectF, image: &RgbaImage) {
        let screen = self.screen_rect();
        let Some(framebuffer) = self.framebuffer.as_mut() else {
            return;
        };
        let Some(visible) = target.intersected(&clip).and_then(|r| r.intersected(&screen)) else {
            return;
        };

        let width = (target.width.round() as u32).max(1);
        let height = (target.height.round() as u32).max(1);
        let scaled = imageops::resize(image, width, height, FilterType::Triangle);

        let x = (visible.x - target.x).round().max(0.0) as u32;
        let y = (visible.y - target.y).round().max(0.0) as u32;
        let w = (visible.width.round() as u32).min(width.saturating_sub(x));
        let h = (visible.height.round() as u32).min(height.saturating_sub(y));
        if w == 0 || h == 0 {
            return;
        }
        let part = imageops::crop_imm(&scaled, x, y, w, h).to_image();
        imageops::replace(framebuffer, &part, visible.x.round() as i64, visible.y.round() as i64);
    }
}

impl Presenter for HeadlessPresenter {
    fn screen_size(&self) -> Size {
        self.screen_size
    }

    fn begin_frame(&mut self, frame: u64, background: Color) -> NodeResult<()> {
        if self.current.is_some() {
            log::warn!("Frame {} started before the previous one was swapped", frame);
        }
        self.current = Some(FrameRecord {
            frame,
            background,
            commands: Vec::new(),
        });
        if self.composite {
            self.framebuffer = Some(RgbaImage::from_pixel(
                self.screen_size.width,
                self.screen_size.height,
                Rgba(background.to_rgba()),
            ));
        }
        Ok(())
    }

    fn draw_tile(
        &mut self,
        window: WindowId,
        tile: TileId,
        target: RectF,
        clip: RectF,
        image: &TileImage,
    ) -> NodeResult<()> {
        self.record(DrawCommand::Tile {
            window,
            tile,
            target,
            clip,
        })?;
        self.composite_tile(target, clip, image);
        Ok(())
    }

    fn draw_border(&mut self, window: WindowId, rect: RectF, selected: bool) -> NodeResult<()> {
        self.record(DrawCommand::Border {
            window,
            rect,
            selected,
        })
    }

    fn draw_marker(&mut self, id: u32, position: PointF) -> NodeResult<()> {
        self.record(DrawCommand::Marker { id, position })
    }

    fn draw_text(&mut self, position: PointF, text: &str) -> NodeResult<()> {
        self.record(DrawCommand::Text {
            position,
            text: text.to_string(),
        })
    }

    fn draw_test_pattern(&mut self, label: &str) -> NodeResult<()> {
        self.record(DrawCommand::TestPattern {
            label: label.to_string(),
        })
    }

    fn swap_buffers(&mut self) -> NodeResult<()> {
        let frame = self
            .current
            .take()
            .ok_or_else(|| NodeError::Presenter("swap without a frame".into()))?;
        let mut presented = self.presented.inner.lock();
        presented.frames += 1;
        presented.last = Some(frame);
        if let Some(framebuffer) = self.framebuffer.take() {
            presented.framebuffer = Some(framebuffer);
        }
        Ok(())
    }
}
