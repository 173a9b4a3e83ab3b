//! Precomputed image pyramids
//!
//! On disk a pyramid is a JSON manifest `<name>.pyr` next to a folder
//! `<name>_pyramid/` holding one sub-folder per LOD with the tiles named
//! `<x>_<y>.<extension>`.
//!
//! The manifest lists the tile grid of every LOD. Those grids are redundant
//! with the full resolution size and the tile size, and opening a pyramid
//! whose grids disagree with them fails.

use crate::cache::{EvictionPolicy, TileCache};
use crate::error::{TileError, TileResult};
use crate::lod::{LodTools, TileId, TileIndex, MAX_TILE_COUNT};
use crate::source::{TileDataSource, TileImage};
use crate::tree::{PyramidNode, PyramidTree};
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use wall_core::Size;

/// Manifest file extension
pub const MANIFEST_EXTENSION: &str = "pyr";

/// Tile grid of one LOD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelGrid {
    pub lod: u32,
    pub columns: u32,
    pub rows: u32,
}

/// Pyramid metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PyramidManifest {
    /// Full resolution width in pixels
    pub width: u32,
    /// Full resolution height in pixels
    pub height: u32,
    pub tile_size: u32,
    /// Tile image file extension, without the dot
    pub extension: String,
    /// Grid of every LOD, LOD 0 first
    pub levels: Vec<LevelGrid>,
}

impl PyramidManifest {
    /// Manifest of a pyramid built from a `content_size` image
    pub fn new(content_size: Size, tile_size: u32, extension: impl Into<String>) -> Self {
        let tools = LodTools::new(content_size, tile_size);
        let levels = (0..=tools.max_lod())
            .map(|lod| {
                let (columns, rows) = tools.tile_grid_size(lod);
                LevelGrid { lod, columns, rows }
            })
            .collect();

        Self {
            width: content_size.width,
            height: content_size.height,
            tile_size,
            extension: extension.into(),
            levels,
        }
    }

    pub fn content_size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Check the manifest is self-consistent and return its geometry
    pub fn validate(&self) -> TileResult<LodTools> {
        if self.width == 0 || self.height == 0 {
            return Err(TileError::InvalidManifest(format!(
                "empty content size {}x{}",
                self.width, self.height
            )));
        }
        if self.tile_size == 0 {
            return Err(TileError::InvalidManifest("tile size is zero".into()));
        }
        if self.extension.is_empty() || self.extension.contains(['/', '\\', '.']) {
            return Err(TileError::InvalidManifest(format!(
                "bad tile extension '{}'",
                self.extension
            )));
        }

        let tools = LodTools::new(self.content_size(), self.tile_size);
        if !tools.is_addressable() {
            return Err(TileError::InvalidManifest(format!(
                "{}x{} content in {} pixel tiles needs more than {} tiles",
                self.width, self.height, self.tile_size, MAX_TILE_COUNT
            )));
        }
        let expected = tools.max_lod() as usize + 1;
        if self.levels.len() != expected {
            return Err(TileError::InvalidManifest(format!(
                "{} levels declared, {} expected",
                self.levels.len(),
                expected
            )));
        }

        for (lod, level) in self.levels.iter().enumerate() {
            let lod = lod as u32;
            let (columns, rows) = tools.tile_grid_size(lod);
            if level.lod != lod || level.columns != columns || level.rows != rows {
                return Err(TileError::InvalidManifest(format!(
                    "level {} declares {}x{} tiles at LOD {}, expected {}x{}",
                    lod, level.columns, level.rows, level.lod, columns, rows
                )));
            }
        }
        Ok(tools)
    }

    pub fn load(path: &Path) -> TileResult<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> TileResult<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Tile folder belonging to a manifest path
pub fn pyramid_folder(manifest_path: &Path) -> PathBuf {
    let stem = manifest_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    manifest_path.with_file_name(format!("{}_pyramid", stem))
}

fn tile_path(folder: &Path, index: TileIndex, extension: &str) -> PathBuf {
    folder
        .join(index.lod.to_string())
        .join(format!("{}_{}.{}", index.x, index.y, extension))
}

/// A pyramid of pre-rendered tiles read from disk
pub struct ImagePyramid {
    uri: String,
    folder: PathBuf,
    manifest: PyramidManifest,
    tree: PyramidTree,
    cache: TileCache,
}

impl ImagePyramid {
    /// Open a pyramid from its manifest
    pub fn open(manifest_path: impl AsRef<Path>) -> TileResult<Self> {
        Self::open_with_cache(manifest_path, TileCache::new())
    }

    pub fn open_with_policy(
        manifest_path: impl AsRef<Path>,
        policy: impl EvictionPolicy + 'static,
    ) -> TileResult<Self> {
        Self::open_with_cache(manifest_path, TileCache::with_policy(policy))
    }

    fn open_with_cache(manifest_path: impl AsRef<Path>, cache: TileCache) -> TileResult<Self> {
        let manifest_path = manifest_path.as_ref();
        let manifest = PyramidManifest::load(manifest_path)?;
        let tools = manifest.validate()?;
        let folder = pyramid_folder(manifest_path);

        log::info!(
            "Opened pyramid {} ({}x{}, tile {}, max LOD {})",
            manifest_path.display(),
            manifest.width,
            manifest.height,
            manifest.tile_size,
            tools.max_lod()
        );

        Ok(Self {
            uri: manifest_path.to_string_lossy().into_owned(),
            folder,
            manifest,
            tree: PyramidTree::new(tools),
            cache,
        })
    }

    pub fn manifest(&self) -> &PyramidManifest {
        &self.manifest
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn tile_path(&self, index: TileIndex) -> PathBuf {
        tile_path(&self.folder, index, &self.manifest.extension)
    }

    fn read_tile(&self, node: &PyramidNode) -> TileResult<RgbaImage> {
        let image = image::open(self.tile_path(node.index))?.to_rgba8();
        if image.dimensions() != (node.rect.width, node.rect.height) {
            return Err(TileError::InvalidManifest(format!(
                "tile {} is {}x{}, expected {}",
                node.index,
                image.width(),
                image.height(),
                node.rect.size()
            )));
        }
        Ok(image)
    }

    /// Read `tile` from disk, falling back to an uncached ancestor crop
    ///
    /// Only tiles read from their own file enter the cache, so a tile that
    /// becomes readable again is picked up on the next request.
    fn load_tile(&self, tile: TileId) -> TileResult<TileImage> {
        let node = self.tree.node(tile).ok_or(TileError::TileOutOfRange(tile))?;
        match self
            .cache
            .get_or_load(tile, || self.read_tile(node).map(Arc::new))
        {
            Ok(image) => Ok(image),
            Err(err) => {
                log::warn!("Cannot read tile {} of {}: {}", node.index, self.uri, err);
                self.from_ancestor(node).ok_or(err)
            }
        }
    }

    /// Synthesize a tile from the nearest readable ancestor
    fn from_ancestor(&self, node: &PyramidNode) -> Option<TileImage> {
        self.tree.ancestors(node.id).find_map(|ancestor| {
            let image = match self.cache.get(ancestor.id) {
                Some(image) => image,
                None => Arc::new(self.read_tile(ancestor).ok()?),
            };
            log::debug!("Tile {} of {} filled from {}", node.index, self.uri, ancestor.index);
            Some(Arc::new(upscale_region(node, ancestor, &image)))
        })
    }
}

/// The part of `ancestor`'s image covering `node`, scaled to `node`'s size
fn upscale_region(node: &PyramidNode, ancestor: &PyramidNode, image: &RgbaImage) -> RgbaImage {
    let shift = ancestor.index.lod - node.index.lod;
    let scale = 1u32 << shift;

    let x = (node.rect.x / scale).saturating_sub(ancestor.rect.x);
    let y = (node.rect.y / scale).saturating_sub(ancestor.rect.y);
    let x = x.min(image.width().saturating_sub(1));
    let y = y.min(image.height().saturating_sub(1));
    let width = node.rect.width.div_ceil(scale).clamp(1, image.width() - x);
    let height = node.rect.height.div_ceil(scale).clamp(1, image.height() - y);

    let region = imageops::crop_imm(image, x, y, width, height).to_image();
    imageops::resize(&region, node.rect.width, node.rect.height, FilterType::Triangle)
}

impl TileDataSource for ImagePyramid {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn lod_tools(&self) -> &LodTools {
        self.tree.lod_tools()
    }

    fn tile_image(&self, tile: TileId, _timestamp: f64) -> TileResult<TileImage> {
        self.load_tile(tile)
    }
}

/// Builds a pyramid on disk from a full resolution image
#[derive(Debug, Clone)]
pub struct PyramidGenerator {
    tile_size: u32,
    extension: String,
    filter: FilterType,
}

impl Default for PyramidGenerator {
    fn default() -> Self {
        Self::new(crate::lod::DEFAULT_TILE_SIZE)
    }
}

impl PyramidGenerator {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            extension: "png".to_string(),
            filter: FilterType::Triangle,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Write the tiles of `source` and the manifest at `manifest_path`
    ///
    /// LOD 0 tiles are crops of `source`. Every other tile is its children
    /// stitched together and halved.
    pub fn generate(&self, source: &RgbaImage, manifest_path: &Path) -> TileResult<PyramidManifest> {
        let (width, height) = source.dimensions();
        let manifest = PyramidManifest::new(Size::new(width, height), self.tile_size, &*self.extension);
        let tools = manifest.validate()?;
        let tree = PyramidTree::new(tools);
        let folder = pyramid_folder(manifest_path);

        let mut previous: HashMap<TileId, RgbaImage> = HashMap::new();
        for lod in 0..=tools.max_lod() {
            fs::create_dir_all(folder.join(lod.to_string()))?;

            let mut current = HashMap::new();
            for node in tree.level(lod) {
                let image = if lod == 0 {
                    let rect = node.rect;
                    imageops::crop_imm(source, rect.x, rect.y, rect.width, rect.height).to_image()
                } else {
                    self.downscale_children(&tree, node, &previous)
                };
                self.save_tile(&image, &tile_path(&folder, node.index, &self.extension))?;
                current.insert(node.id, image);
            }
            previous = current;
        }

        manifest.save(manifest_path)?;
        log::info!(
            "Generated pyramid {} ({} tiles, max LOD {})",
            manifest_path.display(),
            tree.len(),
            tools.max_lod()
        );
        Ok(manifest)
    }

    fn downscale_children(
        &self,
        tree: &PyramidTree,
        node: &PyramidNode,
        children: &HashMap<TileId, RgbaImage>,
    ) -> RgbaImage {
        let rects: Vec<_> = tree.children(node.id).map(|child| (child.id, child.rect)).collect();
        let left = rects.iter().map(|(_, r)| r.x).min().unwrap_or(0);
        let top = rects.iter().map(|(_, r)| r.y).min().unwrap_or(0);
        let right = rects.iter().map(|(_, r)| r.right()).max().unwrap_or(left + 1);
        let bottom = rects.iter().map(|(_, r)| r.bottom()).max().unwrap_or(top + 1);

        let mut canvas = RgbaImage::new(right - left, bottom - top);
        for (id, rect) in &rects {
            if let Some(image) = children.get(id) {
                imageops::overlay(
                    &mut canvas,
                    image,
                    i64::from(rect.x - left),
                    i64::from(rect.y - top),
                );
            }
        }
        imageops::resize(&canvas, node.rect.width, node.rect.height, self.filter)
    }

    fn save_tile(&self, image: &RgbaImage, path: &Path) -> TileResult<()> {
        match self.extension.to_ascii_lowercase().as_str() {
            // No alpha channel in JPEG
            "jpg" | "jpeg" => DynamicImage::ImageRgba8(image.clone()).to_rgb8().save(path)?,
            _ => image.save(path)?,
        }
        Ok(())
    }
}
