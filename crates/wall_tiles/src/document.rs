//! On-demand tiling of documents
//!
//! A [`DocumentTiler`] has no tiles on disk. Its geometry follows from the
//! page size and a resolution scale, and each tile is rasterized when first
//! requested. Rasterizers are not assumed to be thread safe: all rendering
//! goes through one mutex, while the tile cache makes sure a tile requested
//! twice at the same time is only rendered once.

use crate::cache::{EvictionPolicy, TileCache};
use crate::error::{TileError, TileResult};
use crate::lod::{LodTools, TileId, DEFAULT_TILE_SIZE};
use crate::source::{TileDataSource, TileImage};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::sync::Arc;
use wall_core::{Rect, Size};

/// Renders regions of a page
pub trait Rasterizer: Send {
    /// Natural page size, in points
    fn page_size(&self) -> Size;

    /// Render `region` of the page drawn at `target` pixels
    fn render(&mut self, target: Size, region: Rect) -> TileResult<RgbaImage>;
}

/// Tiles rasterized from a document page
pub struct DocumentTiler {
    uri: String,
    tools: LodTools,
    rasterizer: Mutex<Box<dyn Rasterizer>>,
    cache: TileCache,
}

impl DocumentTiler {
    pub fn new(uri: impl Into<String>, rasterizer: impl Rasterizer + 'static) -> Self {
        Self::with_scale(uri, rasterizer, 1.0, DEFAULT_TILE_SIZE)
    }

    /// Tiler whose LOD 0 is the page drawn `scale` times its natural size
    pub fn with_scale(
        uri: impl Into<String>,
        rasterizer: impl Rasterizer + 'static,
        scale: f64,
        tile_size: u32,
    ) -> Self {
        let page = rasterizer.page_size();
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let content = Size::new(
            ((page.width as f64 * scale).round() as u32).max(1),
            ((page.height as f64 * scale).round() as u32).max(1),
        );

        Self {
            uri: uri.into(),
            tools: LodTools::new(content, tile_size),
            rasterizer: Mutex::new(Box::new(rasterizer)),
            cache: TileCache::new(),
        }
    }

    pub fn with_cache_policy(mut self, policy: impl EvictionPolicy + 'static) -> Self {
        self.cache = TileCache::with_policy(policy);
        self
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    fn rasterize(&self, tile: TileId) -> TileResult<TileImage> {
        let index = self
            .tools
            .tile_index(tile)
            .ok_or(TileError::TileOutOfRange(tile))?;
        let rect = self
            .tools
            .tile_rect(index.lod, index.x, index.y)
            .ok_or(TileError::TileOutOfRange(tile))?;
        let target = self.tools.tiles_area(index.lod);

        let image = self.rasterizer.lock().render(target, rect)?;
        if image.dimensions() != (rect.width, rect.height) {
            return Err(TileError::Rasterization(format!(
                "rasterizer returned {}x{} for tile {}, expected {}",
                image.width(),
                image.height(),
                index,
                rect.size()
            )));
        }
        Ok(Arc::new(image))
    }
}

impl TileDataSource for DocumentTiler {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn lod_tools(&self) -> &LodTools {
        &self.tools
    }

    fn tile_image(&self, tile: TileId, _timestamp: f64) -> TileResult<TileImage> {
        self.cache.get_or_load(tile, || self.rasterize(tile))
    }
}

/// A synthetic page: a color gradient with a checkerboard overlay
///
/// The pattern is defined in normalized page coordinates, so a tile renders
/// the same picture at every LOD.
#[derive(Debug, Clone, Copy)]
pub struct TestPattern {
    page_size: Size,
    squares: u32,
}

impl TestPattern {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            squares: 8,
        }
    }

    pub fn with_squares(mut self, squares: u32) -> Self {
        self.squares = squares.max(1);
        self
    }

    /// Color of the page at normalized position `(u, v)`
    pub fn color_at(&self, u: f64, v: f64) -> Rgba<u8> {
        let u = u.clamp(0.0, 1.0);
        let v = v.clamp(0.0, 1.0);
        let cell = ((u * self.squares as f64) as u32 + (v * self.squares as f64) as u32) % 2;
        let blue = if cell == 0 { 64 } else { 192 };
        Rgba([(u * 255.0) as u8, (v * 255.0) as u8, blue, 255])
    }
}

impl Rasterizer for TestPattern {
    fn page_size(&self) -> Size {
        self.page_size
    }

    fn render(&mut self, target: Size, region: Rect) -> TileResult<RgbaImage> {
        if target.is_empty() || region.right() > target.width || region.bottom() > target.height {
            return Err(TileError::Rasterization(format!(
                "region {:?} outside a {} page",
                region, target
            )));
        }
        let (tw, th) = (target.width as f64, target.height as f64);
        Ok(RgbaImage::from_fn(region.width, region.height, |x, y| {
            let u = (region.x + x) as f64 + 0.5;
            let v = (region.y + y) as f64 + 0.5;
            self.color_at(u / tw, v / th)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    /// Counts renders and fails if two run at once
    struct CountingRasterizer {
        inner: TestPattern,
        renders: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
    }

    impl Rasterizer for CountingRasterizer {
        fn page_size(&self) -> Size {
            self.inner.page_size()
        }

        fn render(&mut self, target: Size, region: Rect) -> TileResult<RgbaImage> {
            assert_eq!(self.active.fetch_add(1, Ordering::SeqCst), 0);
            self.renders.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            let image = self.inner.render(target, region);
            self.active.fetch_sub(1, Ordering::SeqCst);
            image
        }
    }

    fn counting_tiler() -> (Arc<DocumentTiler>, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let rasterizer = CountingRasterizer {
            inner: TestPattern::new(Size::new(1000, 800)),
            renders: Arc::clone(&renders),
            active: Arc::new(AtomicUsize::new(0)),
        };
        let tiler = DocumentTiler::with_scale("page.pdf", rasterizer, 2.0, 256);
        (Arc::new(tiler), renders)
    }

    #[test]
    fn test_geometry_from_page_and_scale() {
        let tiler = DocumentTiler::with_scale("page.pdf", TestPattern::new(Size::new(1000, 800)), 2.0, 256);
        assert_eq!(tiler.tiles_area(0), Size::new(2000, 1600));
        assert_eq!(tiler.tiles_area(1), Size::new(1000, 800));
        assert_eq!(tiler.max_lod(), 3);
    }

    #[test]
    fn test_tile_has_its_rect_size() {
        let tiler = DocumentTiler::new("page.pdf", TestPattern::new(Size::new(700, 300)));
        for raw in 0..tiler.lod_tools().tile_count() {
            let tile = TileId(raw);
            let rect = tiler.tile_rect(tile).unwrap();
            let image = tiler.tile_image(tile, 0.0).unwrap();
            assert_eq!(image.dimensions(), (rect.width, rect.height));
        }
        assert!(matches!(
            tiler.tile_image(TileId(1000), 0.0),
            Err(TileError::TileOutOfRange(_))
        ));
    }

    #[test]
    fn test_same_tile_rendered_once() {
        let (tiler, renders) = counting_tiler();
        let start = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tiler = Arc::clone(&tiler);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    tiler.tile_image(TileId(5), 0.0).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(renders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_different_tiles_render_serialized() {
        let (tiler, renders) = counting_tiler();
        let handles: Vec<_> = (0..6)
            .map(|raw| {
                let tiler = Arc::clone(&tiler);
                thread::spawn(move || tiler.tile_image(TileId(raw), 0.0).map(|_| ()))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(renders.load(Ordering::SeqCst), 6);
        assert_eq!(tiler.cache().len(), 6);
    }

    #[test]
    fn test_pattern_is_resolution_independent() {
        let mut pattern = TestPattern::new(Size::new(100, 100));
        let full = pattern.render(Size::new(512, 512), Rect::new(0, 0, 512, 512)).unwrap();
        let half = pattern.render(Size::new(256, 256), Rect::new(0, 0, 256, 256)).unwrap();
        assert_eq!(full.get_pixel(100, 300), half.get_pixel(50, 150));
        assert!(pattern.render(Size::new(256, 256), Rect::new(200, 0, 100, 10)).is_err());
    }
}
