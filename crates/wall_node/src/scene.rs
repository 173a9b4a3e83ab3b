//! Node-side scene
//!
//! A [`WallScene`] is what one wall node makes of the committed state: one
//! [`WindowRenderer`] per content window, the node's screen rectangle and the
//! overlays to draw. It only changes on commit, between the sync round and
//! the swap barrier, so every node renders the same state in the same frame.

use crate::error::NodeResult;
use crate::presenter::Presenter;
use wall_core::{ContentWindow, DisplayGroup, Markers, Options, PointF, RectF, StreamFrames, WallLayout, WindowId};
use wall_tiles::{DataSourceFactory, FetchedTile, LodSynchronizer, TileDataSource, TileId, TileRequest};

/// Draws one content window
pub struct WindowRenderer {
    window: ContentWindow,
    /// `None` when the content could not be opened
    sync: Option<LodSynchronizer>,
}

impl WindowRenderer {
    fn open(window: ContentWindow, factory: &DataSourceFactory, frame: u64) -> Self {
        let sync = match factory.get(&window.uri, frame) {
            Ok(source) => Some(LodSynchronizer::new(source)),
            Err(err) => {
                log::warn!("{}: cannot open {}: {}", window.id, window.uri, err);
                None
            }
        };
        Self { window, sync }
    }

    pub fn window(&self) -> &ContentWindow {
        &self.window
    }

    pub fn synchronizer(&self) -> Option<&LodSynchronizer> {
        self.sync.as_ref()
    }

    /// Recompute visible tiles for `screen`, returning the tiles to fetch
    fn update(&mut self, screen: &RectF, timestamp: f64) -> Vec<TileRequest> {
        let Some(sync) = self.sync.as_mut() else {
            return Vec::new();
        };

        // Hidden and off-screen windows keep their source but hold no tiles
        let area = if self.window.hidden {
            None
        } else {
            self.window.visible_area(screen)
        };
        let refresh = sync.update(self.window.display_size(), &area.unwrap_or_default());

        match refresh {
            Some(refresh) => refresh
                .requested
                .into_iter()
                .map(|tile| TileRequest::new(self.window.id, sync.source(), tile, timestamp))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Screen pixel rectangle covered by `tile` when the whole content is drawn over `content`
fn tile_target(source: &dyn TileDataSource, tile: TileId, content: &RectF) -> Option<RectF> {
    let tools = source.lod_tools();
    let index = tools.tile_index(tile)?;
    let rect = tools.tile_rect(index.lod, index.x, index.y)?.to_rectf();
    let area = tools.tiles_area(index.lod);
    let sx = content.width / area.width as f64;
    let sy = content.height / area.height as f64;
    Some(RectF::new(
        content.x + rect.x * sx,
        content.y + rect.y * sy,
        rect.width * sx,
        rect.height * sy,
    ))
}

fn to_screen(rect: &RectF, screen: &RectF) -> RectF {
    RectF::new(rect.x - screen.x, rect.y - screen.y, rect.width, rect.height)
}

/// The committed scene as rendered by one node
pub struct WallScene {
    rank: usize,
    layout: WallLayout,
    screen: RectF,
    options: Options,
    markers: Markers,
    stream_frames: StreamFrames,
    renderers: Vec<WindowRenderer>,
}

impl WallScene {
    pub fn new(rank: usize, layout: WallLayout, options: Options) -> Self {
        let mut scene = Self {
            rank,
            layout,
            screen: RectF::default(),
            options: Options::default(),
            markers: Markers::default(),
            stream_frames: StreamFrames::default(),
            renderers: Vec::new(),
        };
        scene.apply_options(options);
        scene
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    /// This node's screen, in wall pixels
    pub fn screen(&self) -> RectF {
        self.screen
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn markers(&self) -> &Markers {
        &self.markers
    }

    pub fn stream_frames(&self) -> &StreamFrames {
        &self.stream_frames
    }

    /// Renderers back to front
    pub fn renderers(&self) -> &[WindowRenderer] {
        &self.renderers
    }

    pub fn renderer(&self, window: WindowId) -> Option<&WindowRenderer> {
        self.renderers.iter().find(|r| r.window.id == window)
    }

    /// Rebuild the renderers for a committed display group
    ///
    /// Renderers of windows still showing the same content are kept with
    /// their resident tiles; renderers of closed windows are dropped, which
    /// releases their data source.
    pub fn apply_display_group(&mut self, group: &DisplayGroup, factory: &DataSourceFactory, frame: u64) {
        let mut previous = std::mem::take(&mut self.renderers);

        for window in group.windows() {
            let kept = previous
                .iter()
                .position(|r| r.window.id == window.id && r.window.uri == window.uri)
                .map(|index| previous.swap_remove(index));

            let renderer = match kept {
                Some(mut renderer) => {
                    renderer.window = window.clone();
                    renderer
                }
                None => {
                    log::debug!("Node {}: opening {} ({})", self.rank, window.id, window.uri);
                    WindowRenderer::open(window.clone(), factory, frame)
                }
            };
            self.renderers.push(renderer);
        }

        for closed in previous {
            log::debug!("Node {}: closed {}", self.rank, closed.window.id);
        }
    }

    /// Apply committed options
    ///
    /// Toggling mullion compensation moves the screen within the wall.
    pub fn apply_options(&mut self, options: Options) {
        self.layout.mullion_compensation = options.mullion_compensation;
        let (column, row) = self.layout.screen_position(self.rank);
        self.screen = self.layout.screen_rect(column, row);
        self.options = options;
    }

    pub fn apply_markers(&mut self, markers: Markers) {
        self.markers = markers;
    }

    pub fn apply_stream_frames(&mut self, frames: StreamFrames) {
        self.stream_frames = frames;
    }

    /// Update every window's visible tiles, returning the tiles to fetch
    pub fn update_tiles(&mut self, timestamp: f64) -> Vec<TileRequest> {
        let screen = self.screen;
        self.renderers
            .iter_mut()
            .flat_map(|renderer| renderer.update(&screen, timestamp))
            .collect()
    }

    /// Hand fetched tiles to their windows
    ///
    /// Returns the number of tiles accepted. Tiles of closed windows or no
    /// longer visible tiles are dropped.
    pub fn deliver(&mut self, fetched: Vec<FetchedTile>) -> usize {
        let mut accepted = 0;
        for result in fetched {
            let Some(sync) = self
                .renderers
                .iter_mut()
                .find(|r| r.window.id == result.window)
                .and_then(|r| r.sync.as_mut())
            else {
                continue;
            };
            match result.image {
                Some(image) => {
                    if sync.on_tile_loaded(result.tile, image) {
                        accepted += 1;
                    }
                }
                None => sync.on_tile_failed(result.tile),
            }
        }
        accepted
    }

    /// Mark the sources of all windows, hidden ones included, as used
    pub fn touch_sources(&self, factory: &DataSourceFactory, frame: u64) {
        for renderer in &self.renderers {
            if renderer.sync.is_some() {
                factory.touch(&renderer.window.uri, frame);
            }
        }
    }

    /// Draw the scene; `overlay` is the node statistics line
    pub fn render<P: Presenter + ?Sized>(
        &self,
        presenter: &mut P,
        frame: u64,
        now: f64,
        overlay: Option<&str>,
    ) -> NodeResult<()> {
        presenter.begin_frame(frame, self.options.background_color)?;

        if self.options.show_test_pattern {
            let (column, row) = self.layout.screen_position(self.rank);
            let label = format!("rank {} screen {},{}", self.rank, column, row);
            return presenter.draw_test_pattern(&label);
        }

        for renderer in &self.renderers {
            if !renderer.window.hidden {
                self.render_window(presenter, renderer)?;
            }
        }

        if self.options.show_touch_points {
            let wall = self.layout.wall_rect();
            for marker in self.markers.active(now) {
                let position = PointF::new(
                    marker.position.x * wall.width,
                    marker.position.y * wall.height,
                );
                if self.screen.contains(position) {
                    let local = PointF::new(position.x - self.screen.x, position.y - self.screen.y);
                    presenter.draw_marker(marker.id, local)?;
                }
            }
        }

        if self.options.show_statistics {
            if let Some(text) = overlay {
                presenter.draw_text(PointF::new(10.0, 10.0), text)?;
            }
        }
        Ok(())
    }

    fn render_window<P: Presenter + ?Sized>(&self, presenter: &mut P, renderer: &WindowRenderer) -> NodeResult<()> {
        let window = &renderer.window;
        if window.coordinates.intersected(&self.screen).is_none() {
            return Ok(());
        }
        let clip = to_screen(&window.coordinates, &self.screen);

        if let Some(sync) = &renderer.sync {
            let content = to_screen(&window.content_rect(), &self.screen);
            for (tile, image) in sync.tiles() {
                let Some(image) = image else {
                    continue;
                };
                if let Some(target) = tile_target(sync.source().as_ref(), tile, &content) {
                    presenter.draw_tile(window.id, tile, target, clip, &image)?;
                }
            }
        }

        if self.options.show_window_borders {
            presenter.draw_border(window.id, clip, window.selected)?;
        }

        if self.options.show_statistics {
            if let Some(sync) = &renderer.sync {
                let mut text = sync.statistics();
                if let Some(frame) = self.stream_frames.frame(&window.uri) {
                    text.push_str(&format!("  frame: {}", frame));
                }
                presenter.draw_text(PointF::new(clip.x, clip.y), &text)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::HeadlessPresenter;
    use wall_core::Size;
    use wall_tiles::PatternLoader;

    /// Two 100x100 screens side by side
    fn layout() -> WallLayout {
        WallLayout {
            screen_size: Size::new(100, 100),
            screens_x: 2,
            screens_y: 1,
            mullion: Size::new(10, 0),
            mullion_compensation: false,
        }
    }

    fn options() -> Options {
        Options {
            mullion_compensation: false,
            ..Options::default()
        }
    }

    fn factory() -> DataSourceFactory {
        let mut factory = DataSourceFactory::new();
        factory.register(PatternLoader {
            tile_size: 64,
            scale: 1.0,
            cache_limit: None,
        });
        factory
    }

    fn group_with(window: &ContentWindow) -> DisplayGroup {
        let mut group = DisplayGroup::new(layout().wall_rect());
        group.add_window(window.clone());
        group
    }

    /// Load every requested tile synchronously
    fn fetch(requests: Vec<TileRequest>) -> Vec<FetchedTile> {
        requests
            .into_iter()
            .map(|request| FetchedTile {
                window: request.window,
                tile: request.tile,
                image: request
                    .source
                    .upgrade()
                    .and_then(|source| source.tile_image(request.tile, request.timestamp).ok()),
            })
            .collect()
    }

    fn window() -> ContentWindow {
        // 190x95 on screen picks LOD 1 (200x100, 4x2 tiles of 64)
        ContentWindow::new("400x200.pattern", Size::new(400, 200), RectF::new(0.0, 0.0, 190.0, 95.0))
    }

    #[test]
    fn test_each_node_requests_its_own_tiles() {
        let factory = factory();
        let window = window();
        let group = group_with(&window);

        let mut left = WallScene::new(0, layout(), options());
        let mut right = WallScene::new(1, layout(), options());
        left.apply_display_group(&group, &factory, 1);
        right.apply_display_group(&group, &factory, 1);

        assert_eq!(left.update_tiles(0.0).len(), 4);
        assert_eq!(right.update_tiles(0.0).len(), 6);
        // Both nodes share one source
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_renders_delivered_tiles() {
        let factory = factory();
        let window = window();
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group_with(&window), &factory, 1);

        let requests = scene.update_tiles(0.0);
        assert_eq!(scene.deliver(fetch(requests)), 4);

        let mut presenter = HeadlessPresenter::new(Size::new(100, 100));
        let presented = presenter.presented();
        scene.render(&mut presenter, 1, 0.0, None).unwrap();
        presenter.swap_buffers().unwrap();

        let frame = presented.last_frame().unwrap();
        assert_eq!(frame.tiles_of(window.id).len(), 4);
        assert!(frame.commands.iter().any(|c| matches!(
            c,
            crate::presenter::DrawCommand::Border { rect, .. } if *rect == RectF::new(0.0, 0.0, 190.0, 95.0)
        )));
    }

    #[test]
    fn test_tile_targets_cover_content() {
        let factory = factory();
        let source = factory.get("400x200.pattern", 0).unwrap();
        let content = RectF::new(-50.0, 10.0, 200.0, 100.0);
        let lod1 = source.lod_tools().first_tile_id(1);

        let first = tile_target(source.as_ref(), lod1, &content).unwrap();
        assert_eq!(first, RectF::new(-50.0, 10.0, 64.0, 64.0));

        // Last tile of LOD 1 is the 8x36 remainder at (192, 64)
        let last = TileId(lod1.0 + 7);
        let target = tile_target(source.as_ref(), last, &content).unwrap();
        assert_eq!(target, RectF::new(142.0, 74.0, 8.0, 36.0));
    }

    #[test]
    fn test_unchanged_group_keeps_tiles() {
        let factory = factory();
        let window = window();
        let group = group_with(&window);
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group, &factory, 1);
        let requests = scene.update_tiles(0.0);
        scene.deliver(fetch(requests));

        scene.apply_display_group(&group, &factory, 2);
        assert!(scene.update_tiles(0.0).is_empty());
        let sync = scene.renderer(window.id).and_then(|r| r.synchronizer()).unwrap();
        assert_eq!(sync.tiles().filter(|(_, image)| image.is_some()).count(), 4);
    }

    #[test]
    fn test_hidden_window_releases_tiles_keeps_source() {
        let factory = factory();
        let mut window = window();
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group_with(&window), &factory, 1);
        let requests = scene.update_tiles(0.0);
        scene.deliver(fetch(requests));

        window.hidden = true;
        scene.apply_display_group(&group_with(&window), &factory, 2);
        assert!(scene.update_tiles(0.0).is_empty());
        let sync = scene.renderer(window.id).and_then(|r| r.synchronizer()).unwrap();
        assert!(sync.visible_tiles().is_empty());

        scene.touch_sources(&factory, 100);
        assert_eq!(factory.clear_stale(100, 10), 0);
        assert!(factory.contains("400x200.pattern"));
    }

    #[test]
    fn test_closed_window_source_collected() {
        let factory = factory();
        let window = window();
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group_with(&window), &factory, 1);

        scene.apply_display_group(&DisplayGroup::new(layout().wall_rect()), &factory, 2);
        assert!(scene.renderers().is_empty());
        assert_eq!(factory.clear_stale(20, 10), 1);
        assert!(factory.is_empty());
    }

    #[test]
    fn test_unopenable_content_renders_border_only() {
        let factory = factory();
        let window = ContentWindow::new("movie.mp4", Size::new(100, 100), RectF::new(0.0, 0.0, 50.0, 50.0));
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group_with(&window), &factory, 1);
        assert!(scene.update_tiles(0.0).is_empty());

        let mut presenter = HeadlessPresenter::new(Size::new(100, 100));
        let presented = presenter.presented();
        scene.render(&mut presenter, 1, 0.0, None).unwrap();
        presenter.swap_buffers().unwrap();
        assert_eq!(presented.last_frame().unwrap().commands.len(), 1);
    }

    #[test]
    fn test_mullion_compensation_moves_screen() {
        let mut scene = WallScene::new(1, layout(), options());
        assert_eq!(scene.screen(), RectF::new(100.0, 0.0, 100.0, 100.0));

        scene.apply_options(Options::default());
        assert_eq!(scene.screen(), RectF::new(110.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn test_markers_drawn_on_their_screen_while_active() {
        let mut markers = Markers::new();
        // Wall is 200x100: x = 0.75 falls on the right screen
        markers.set_position(1, PointF::new(0.75, 0.5), 10.0);
        markers.set_position(2, PointF::new(0.25, 0.5), 0.0);

        let mut left = WallScene::new(0, layout(), options());
        let mut right = WallScene::new(1, layout(), options());
        left.apply_markers(markers.clone());
        right.apply_markers(markers);

        let drawn = |scene: &WallScene, now: f64| {
            let mut presenter = HeadlessPresenter::new(Size::new(100, 100));
            let presented = presenter.presented();
            scene.render(&mut presenter, 1, now, None).unwrap();
            presenter.swap_buffers().unwrap();
            presented.last_frame().unwrap().markers()
        };

        assert_eq!(drawn(&right, 12.0), vec![1]);
        // Marker 2 last moved at 0.0, inactive after 5 s
        assert_eq!(drawn(&left, 4.0), vec![2]);
        assert!(drawn(&left, 12.0).is_empty());
    }

    #[test]
    fn test_overlays_follow_options() {
        let factory = factory();
        let window = window();
        let mut scene = WallScene::new(0, layout(), options());
        scene.apply_display_group(&group_with(&window), &factory, 1);
        scene.update_tiles(0.0);

        let mut stream_frames = StreamFrames::new();
        stream_frames.set_frame("400x200.pattern", 42);
        scene.apply_stream_frames(stream_frames);
        scene.apply_options(Options {
            show_statistics: true,
            mullion_compensation: false,
            ..Options::default()
        });

        let mut presenter = HeadlessPresenter::new(Size::new(100, 100));
        let presented = presenter.presented();
        scene.render(&mut presenter, 1, 0.0, Some("frame 1")).unwrap();
        presenter.swap_buffers().unwrap();
        let frame = presented.last_frame().unwrap();
        assert_eq!(frame.texts(), vec!["LOD:  1/3  res: 200x100  frame: 42", "frame 1"]);

        scene.apply_options(Options {
            show_test_pattern: true,
            ..options()
        });
        scene.render(&mut presenter, 2, 0.0, None).unwrap();
        presenter.swap_buffers().unwrap();
        let frame = presented.last_frame().unwrap();
        assert!(frame.has_test_pattern());
        assert_eq!(frame.commands.len(), 1);
    }
}
