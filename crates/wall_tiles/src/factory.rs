//! Data source factory
//!
//! Maps content uris to [`TileDataSource`]s. Loaders register for file
//! extensions; an opened source is cached by uri and shared by every window
//! showing that content. Sources nobody referenced for a while are dropped by
//! [`DataSourceFactory::clear_stale`].

use crate::cache::{MaxTiles, Unbounded};
use crate::document::{DocumentTiler, TestPattern};
use crate::error::{TileError, TileResult};
use crate::lod::DEFAULT_TILE_SIZE;
use crate::pyramid::{ImagePyramid, MANIFEST_EXTENSION};
use crate::source::TileDataSource;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use wall_core::Size;

/// Opens content of some file types
pub trait SourceLoader: Send + Sync {
    /// File extensions this loader handles, lowercase, without the dot
    fn extensions(&self) -> &[&str];

    fn open(&self, uri: &str) -> TileResult<Arc<dyn TileDataSource>>;
}

/// Opens precomputed pyramids from their manifest
#[derive(Debug, Default, Clone, Copy)]
pub struct PyramidLoader {
    /// Tiles kept per pyramid, unbounded when `None`
    pub cache_limit: Option<usize>,
}

impl SourceLoader for PyramidLoader {
    fn extensions(&self) -> &[&str] {
        &[MANIFEST_EXTENSION]
    }

    fn open(&self, uri: &str) -> TileResult<Arc<dyn TileDataSource>> {
        let pyramid = match self.cache_limit {
            Some(limit) => ImagePyramid::open_with_policy(uri, MaxTiles(limit))?,
            None => ImagePyramid::open_with_policy(uri, Unbounded)?,
        };
        Ok(Arc::new(pyramid))
    }
}

/// Opens synthetic test pattern pages, `<width>x<height>.pattern`
#[derive(Debug, Clone, Copy)]
pub struct PatternLoader {
    pub tile_size: u32,
    pub scale: f64,
    pub cache_limit: Option<usize>,
}

impl Default for PatternLoader {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            scale: 1.0,
            cache_limit: None,
        }
    }
}

impl PatternLoader {
    fn page_size(uri: &str) -> Option<Size> {
        let stem = Path::new(uri).file_stem()?.to_str()?;
        let (width, height) = stem.split_once('x')?;
        let size = Size::new(width.parse().ok()?, height.parse().ok()?);
        (!size.is_empty()).then_some(size)
    }
}

impl SourceLoader for PatternLoader {
    fn extensions(&self) -> &[&str] {
        &["pattern"]
    }

    fn open(&self, uri: &str) -> TileResult<Arc<dyn TileDataSource>> {
        let page = Self::page_size(uri)
            .ok_or_else(|| TileError::Unavailable(format!("{}: expected <width>x<height>.pattern", uri)))?;
        let tiler = DocumentTiler::with_scale(uri, TestPattern::new(page), self.scale, self.tile_size);
        if !tiler.lod_tools().is_addressable() {
            return Err(TileError::Unavailable(format!("{}: too many tiles", uri)));
        }
        let tiler = match self.cache_limit {
            Some(limit) => tiler.with_cache_policy(MaxTiles(limit)),
            None => tiler,
        };
        Ok(Arc::new(tiler))
    }
}

struct SourceEntry {
    source: Arc<dyn TileDataSource>,
    last_used: u64,
}

/// Content uri to data source, with per-uri caching
pub struct DataSourceFactory {
    loaders: Vec<Box<dyn SourceLoader>>,
    by_extension: BTreeMap<String, usize>,
    sources: Mutex<HashMap<String, SourceEntry>>,
}

impl Default for DataSourceFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceFactory {
    /// Factory without loaders
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
            by_extension: BTreeMap::new(),
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Factory with the pyramid and test pattern loaders
    pub fn with_default_loaders() -> Self {
        let mut factory = Self::new();
        factory.register(PyramidLoader::default());
        factory.register(PatternLoader::default());
        factory
    }

    /// Register a loader; later registrations win for shared extensions
    pub fn register(&mut self, loader: impl SourceLoader + 'static) {
        let idx = self.loaders.len();
        for ext in loader.extensions() {
            self.by_extension.insert(ext.to_lowercase(), idx);
        }
        self.loaders.push(Box::new(loader));
    }

    pub fn supports(&self, uri: &str) -> bool {
        extension(uri).is_some_and(|ext| self.by_extension.contains_key(&ext))
    }

    /// Shared source for `uri`, opening it on first use
    ///
    /// `frame` marks the source as used on that frame.
    pub fn get(&self, uri: &str, frame: u64) -> TileResult<Arc<dyn TileDataSource>> {
        let mut sources = self.sources.lock();
        if let Some(entry) = sources.get_mut(uri) {
            entry.last_used = entry.last_used.max(frame);
            return Ok(Arc::clone(&entry.source));
        }

        let loader = extension(uri)
            .and_then(|ext| self.by_extension.get(&ext))
            .and_then(|idx| self.loaders.get(*idx))
            .ok_or_else(|| TileError::UnsupportedUri(uri.to_string()))?;

        let source = loader.open(uri)?;
        log::info!(
            "Opened {} ({}, max LOD {})",
            uri,
            source.lod_tools().content_size(),
            source.max_lod()
        );
        sources.insert(
            uri.to_string(),
            SourceEntry {
                source: Arc::clone(&source),
                last_used: frame,
            },
        );
        Ok(source)
    }

    /// Mark an already opened source as used on `frame`
    pub fn touch(&self, uri: &str, frame: u64) {
        if let Some(entry) = self.sources.lock().get_mut(uri) {
            entry.last_used = entry.last_used.max(frame);
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.sources.lock().contains_key(uri)
    }

    /// Number of open sources
    pub fn len(&self) -> usize {
        self.sources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop sources unused for `age` frames that nobody else holds
    ///
    /// Returns the number of sources dropped.
    pub fn clear_stale(&self, frame: u64, age: u64) -> usize {
        let mut sources = self.sources.lock();
        let before = sources.len();
        sources.retain(|uri, entry| {
            let stale = frame.saturating_sub(entry.last_used) >= age;
            let shared = Arc::strong_count(&entry.source) > 1;
            if stale && !shared {
                log::debug!("Dropping unused source {}", uri);
                false
            } else {
                true
            }
        });
        before - sources.len()
    }
}

fn extension(uri: &str) -> Option<String> {
    Path::new(uri)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_by_extension() {
        let factory = DataSourceFactory::with_default_loaders();
        assert!(factory.supports("wall/city.pyr"));
        assert!(factory.supports("4096x2048.PATTERN"));
        assert!(!factory.supports("movie.mp4"));
        assert!(!factory.supports("no_extension"));
    }

    #[test]
    fn test_unsupported_and_unavailable() {
        let factory = DataSourceFactory::with_default_loaders();
        assert!(matches!(factory.get("movie.mp4", 0), Err(TileError::UnsupportedUri(_))));
        assert!(matches!(factory.get("big.pattern", 0), Err(TileError::Unavailable(_))));
        assert!(matches!(
            factory.get("4000000x4000000.pattern", 0),
            Err(TileError::Unavailable(_))
        ));
        assert!(factory.get("missing.pyr", 0).is_err());
        assert!(factory.is_empty());
    }

    #[test]
    fn test_sources_shared_by_uri() {
        let factory = DataSourceFactory::with_default_loaders();
        let a = factory.get("4096x4096.pattern", 1).unwrap();
        let b = factory.get("4096x4096.pattern", 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.max_lod(), 3);
        assert_eq!(factory.len(), 1);
    }

    #[test]
    fn test_clear_stale_keeps_referenced_sources() {
        let factory = DataSourceFactory::with_default_loaders();
        let held = factory.get("100x100.pattern", 0).unwrap();
        drop(factory.get("200x200.pattern", 0).unwrap());
        factory.get("300x300.pattern", 0).unwrap();
        factory.touch("300x300.pattern", 8);

        assert_eq!(factory.clear_stale(10, 5), 1);
        assert!(factory.contains("100x100.pattern"));
        assert!(!factory.contains("200x200.pattern"));
        assert!(factory.contains("300x300.pattern"));

        drop(held);
        assert_eq!(factory.clear_stale(20, 5), 2);
        assert!(factory.is_empty());
    }
}
