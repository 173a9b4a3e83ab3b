//! Master-side state publisher
//!
//! The master owns the authoritative scene. Every mutation updates the local
//! copy and publishes the whole changed value; nodes apply it as a local
//! update and the next sync round decides when it takes effect everywhere.

use crate::error::NodeResult;
use std::time::Instant;
use wall_core::{ContentWindow, DisplayGroup, Markers, Options, PointF, RectF, Size, StreamFrames, WallLayout, WindowId};
use wall_sync::{Publisher, WallMessage};
use wall_tiles::DataSourceFactory;

/// Share of the wall a newly opened content may cover
const DEFAULT_WINDOW_FRACTION: f64 = 0.5;

/// Authoritative wall state, published to every node
pub struct WallMaster<P: Publisher> {
    publisher: P,
    layout: WallLayout,
    epoch: Instant,
    display_group: DisplayGroup,
    options: Options,
    markers: Markers,
    stream_frames: StreamFrames,
}

impl<P: Publisher> WallMaster<P> {
    /// `epoch` must be the instant the nodes measure their clock from
    pub fn new(publisher: P, layout: WallLayout, options: Options, epoch: Instant) -> Self {
        Self {
            publisher,
            layout,
            epoch,
            display_group: DisplayGroup::new(layout.wall_rect()),
            options,
            markers: Markers::default(),
            stream_frames: StreamFrames::default(),
        }
    }

    /// Seconds since the shared epoch
    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn display_group(&self) -> &DisplayGroup {
        &self.display_group
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    fn publish_display_group(&self) -> NodeResult<()> {
        self.publisher
            .publish(&WallMessage::DisplayGroup(self.display_group.clone()))?;
        Ok(())
    }

    fn publish_markers(&self) -> NodeResult<()> {
        self.publisher.publish(&WallMessage::Markers(self.markers.clone()))?;
        Ok(())
    }

    /// Open a window at explicit wall coordinates
    pub fn open_window(&mut self, uri: &str, content_size: Size, coordinates: RectF) -> NodeResult<WindowId> {
        let window = ContentWindow::new(uri, content_size, coordinates);
        let id = window.id;
        self.display_group.add_window(window);
        log::info!("Opened {} for {}", id, uri);
        self.publish_display_group()?;
        Ok(id)
    }

    /// Open a window sized to the content's aspect ratio, centered on the wall
    pub fn open_content(&mut self, factory: &DataSourceFactory, uri: &str) -> NodeResult<WindowId> {
        let content_size = factory.get(uri, 0)?.lod_tools().content_size();
        let coordinates = self.default_coordinates(content_size);
        self.open_window(uri, content_size, coordinates)
    }

    fn default_coordinates(&self, content: Size) -> RectF {
        let wall = self.layout.wall_rect();
        let max_width = wall.width * DEFAULT_WINDOW_FRACTION;
        let max_height = wall.height * DEFAULT_WINDOW_FRACTION;
        let scale = (max_width / content.width.max(1) as f64).min(max_height / content.height.max(1) as f64);
        let width = content.width as f64 * scale;
        let height = content.height as f64 * scale;
        RectF::new(
            wall.x + (wall.width - width) / 2.0,
            wall.y + (wall.height - height) / 2.0,
            width,
            height,
        )
    }

    fn modify_window(&mut self, id: WindowId, change: impl FnOnce(&mut ContentWindow)) -> NodeResult<bool> {
        match self.display_group.window_mut(id) {
            Some(window) => {
                change(window);
                self.publish_display_group()?;
                Ok(true)
            }
            None => {
                log::warn!("No window {}", id);
                Ok(false)
            }
        }
    }

    pub fn move_window(&mut self, id: WindowId, coordinates: RectF) -> NodeResult<bool> {
        self.modify_window(id, |window| window.coordinates = coordinates)
    }

    /// Show the normalized `zoom_rect` of the content inside the window
    pub fn set_zoom(&mut self, id: WindowId, zoom_rect: RectF) -> NodeResult<bool> {
        if zoom_rect.is_empty() {
            log::warn!("Ignoring empty zoom for {}", id);
            return Ok(false);
        }
        self.modify_window(id, |window| window.zoom_rect = zoom_rect)
    }

    pub fn set_hidden(&mut self, id: WindowId, hidden: bool) -> NodeResult<bool> {
        self.modify_window(id, |window| window.hidden = hidden)
    }

    pub fn set_selected(&mut self, id: WindowId, selected: bool) -> NodeResult<bool> {
        self.modify_window(id, |window| window.selected = selected)
    }

    pub fn raise_window(&mut self, id: WindowId) -> NodeResult<bool> {
        if !self.display_group.move_to_front(id) {
            return Ok(false);
        }
        self.publish_display_group()?;
        Ok(true)
    }

    pub fn close_window(&mut self, id: WindowId) -> NodeResult<bool> {
        let Some(window) = self.display_group.remove_window(id) else {
            return Ok(false);
        };
        self.stream_frames.remove(&window.uri);
        log::info!("Closed {} ({})", id, window.uri);
        self.publish_display_group()?;
        Ok(true)
    }

    pub fn set_options(&mut self, options: Options) -> NodeResult<()> {
        self.options = options;
        self.publisher.publish(&WallMessage::Options(self.options.clone()))?;
        Ok(())
    }

    /// Move a touch marker to a normalized wall position
    pub fn set_marker(&mut self, id: u32, position: PointF) -> NodeResult<()> {
        let now = self.now();
        self.markers.set_position(id, position, now);
        self.publish_markers()
    }

    pub fn remove_marker(&mut self, id: u32) -> NodeResult<bool> {
        if !self.markers.remove(id) {
            return Ok(false);
        }
        self.publish_markers()?;
        Ok(true)
    }

    /// Make every node swap a stream to `frame` together
    pub fn set_stream_frame(&mut self, uri: &str, frame: u64) -> NodeResult<()> {
        self.stream_frames.set_frame(uri, frame);
        self.publisher
            .publish(&WallMessage::StreamFrames(self.stream_frames.clone()))?;
        Ok(())
    }

    /// Ask every node to stop
    pub fn quit(&self) -> NodeResult<()> {
        log::info!("Requesting wall shutdown");
        self.publisher.publish(&WallMessage::Quit)?;
        Ok(())
    }
}
