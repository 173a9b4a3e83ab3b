//! Wall configuration
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! (or no file at all) describes a single 1920x1080 screen driven by one
//! node.
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Path given on the command line
//! 2. Environment variable: `WALL_CONFIG=/etc/wall/wall.toml`
//! 3. `wall.toml` in the working directory
//! 4. Built-in defaults
//!
//! # Example Config File
//!
//! ```toml
//! [wall]
//! screen_width = 3840
//! screen_height = 1080
//! screens_x = 2
//! screens_y = 3
//! mullion_width = 14
//! mullion_height = 12
//!
//! [cluster]
//! collective_timeout_ms = 10000
//!
//! [tiles]
//! fetch_threads = 4
//! cache_limit = 2048
//!
//! [render]
//! target_fps = 60
//! background_color = "#242424"
//!
//! [session]
//! content = ["/data/wall/city.pyr"]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wall_core::{Color, Options, Size, WallLayout};
use wall_tiles::{DataSourceFactory, PatternLoader, PyramidLoader, DEFAULT_TILE_SIZE};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "WALL_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "wall.toml";

/// Screen grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WallSection {
    pub screen_width: u32,
    pub screen_height: u32,
    pub screens_x: u32,
    pub screens_y: u32,
    /// Bezel gap between two columns, in pixels
    pub mullion_width: u32,
    /// Bezel gap between two rows, in pixels
    pub mullion_height: u32,
    /// Count the bezels as part of the wall
    pub mullion_compensation: bool,
}

impl Default for WallSection {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            screens_x: 1,
            screens_y: 1,
            mullion_width: 0,
            mullion_height: 0,
            mullion_compensation: true,
        }
    }
}

/// Cluster transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Number of wall nodes, one per screen when unset
    pub nodes: Option<usize>,
    /// How long a node waits for its peers in a collective call
    pub collective_timeout_ms: u64,
    /// Versions a value may fall behind before older ones are forgotten
    pub max_pending_versions: usize,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            nodes: None,
            collective_timeout_ms: 10_000,
            max_pending_versions: wall_sync::DEFAULT_MAX_PENDING,
        }
    }
}

/// Tile streaming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesSection {
    /// Background tile loading threads per node
    pub fetch_threads: usize,
    /// Tile size of rasterized documents
    pub tile_size: u32,
    /// Rasterization scale of documents
    pub document_scale: f64,
    /// Tiles kept per content, unbounded when unset
    pub cache_limit: Option<usize>,
}

impl Default for TilesSection {
    fn default() -> Self {
        Self {
            fetch_threads: 2,
            tile_size: DEFAULT_TILE_SIZE,
            document_scale: 1.0,
            cache_limit: None,
        }
    }
}

/// Frame loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSection {
    pub target_fps: u32,
    /// `#rrggbb` or `#rrggbbaa`
    pub background_color: String,
    /// Stop after this many frames, 0 runs until quit
    pub max_frames: u64,
    /// Frames a content may stay unused before it is closed
    pub stale_source_frames: u64,
    pub show_statistics: bool,
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            target_fps: 60,
            background_color: "#000000".to_string(),
            max_frames: 0,
            stale_source_frames: 300,
            show_statistics: false,
        }
    }
}

/// Content opened at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub content: Vec<String>,
}

/// Complete wall configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WallConfig {
    pub wall: WallSection,
    pub cluster: ClusterSection,
    pub tiles: TilesSection,
    pub render: RenderSection,
    pub session: SessionSection,
    /// File the config was read from
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl WallConfig {
    /// Load from the first available source
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Self::load_from_file(Path::new(&path));
            }
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::load_from_file(local);
        }

        log::info!("No wall config found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.config_path = Some(path.to_path_buf());
        log::info!("Loaded wall config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let wall = &self.wall;
        if wall.screen_width == 0 || wall.screen_height == 0 {
            return Err(ConfigError::Validation("screen size must not be zero".into()));
        }
        if wall.screens_x == 0 || wall.screens_y == 0 {
            return Err(ConfigError::Validation("screen grid must not be empty".into()));
        }

        let screens = self.layout().screen_count() as usize;
        let nodes = self.node_count();
        if nodes == 0 || nodes > screens {
            return Err(ConfigError::Validation(format!(
                "{} nodes for {} screens",
                nodes, screens
            )));
        }

        if self.cluster.collective_timeout_ms == 0 {
            return Err(ConfigError::Validation("collective timeout must not be zero".into()));
        }
        if self.cluster.max_pending_versions == 0 {
            return Err(ConfigError::Validation("max_pending_versions must not be zero".into()));
        }
        if self.tiles.tile_size == 0 {
            return Err(ConfigError::Validation("tile size must not be zero".into()));
        }
        if !(self.tiles.document_scale.is_finite() && self.tiles.document_scale > 0.0) {
            return Err(ConfigError::Validation(format!(
                "document scale {} must be positive",
                self.tiles.document_scale
            )));
        }
        if self.tiles.cache_limit == Some(0) {
            return Err(ConfigError::Validation("cache limit must not be zero".into()));
        }

        if Color::from_hex(&self.render.background_color).is_none() {
            return Err(ConfigError::Validation(format!(
                "invalid background color '{}'",
                self.render.background_color
            )));
        }
        Ok(())
    }

    pub fn layout(&self) -> WallLayout {
        WallLayout {
            screen_size: Size::new(self.wall.screen_width, self.wall.screen_height),
            screens_x: self.wall.screens_x,
            screens_y: self.wall.screens_y,
            mullion: Size::new(self.wall.mullion_width, self.wall.mullion_height),
            mullion_compensation: self.wall.mullion_compensation,
        }
    }

    pub fn node_count(&self) -> usize {
        self.cluster
            .nodes
            .unwrap_or(self.layout().screen_count() as usize)
    }

    pub fn collective_timeout(&self) -> Duration {
        Duration::from_millis(self.cluster.collective_timeout_ms)
    }

    /// Initial rendering options
    pub fn options(&self) -> Options {
        Options {
            background_color: Color::from_hex(&self.render.background_color).unwrap_or_default(),
            show_statistics: self.render.show_statistics,
            mullion_compensation: self.wall.mullion_compensation,
            ..Options::default()
        }
    }

    pub fn print_summary(&self) {
        let layout = self.layout();
        log::info!("Wall Configuration:");
        log::info!(
            "  Screens: {}x{} of {}, mullion {} (compensation {})",
            layout.screens_x,
            layout.screens_y,
            layout.screen_size,
            layout.mullion,
            if layout.mullion_compensation { "on" } else { "off" }
        );
        log::info!("  Wall size: {}", layout.total_size());
        log::info!(
            "  Nodes: {}, collective timeout {:?}",
            self.node_count(),
            self.collective_timeout()
        );
        log::info!(
            "  Tiles: {} fetch threads, cache limit {:?}",
            self.tiles.fetch_threads,
            self.tiles.cache_limit
        );
        if let Some(path) = &self.config_path {
            log::info!("  Config: {}", path.display());
        }
    }

    /// Data source factory with loaders set up from the `[tiles]` section
    pub fn data_source_factory(&self) -> DataSourceFactory {
        let mut factory = DataSourceFactory::new();
        factory.register(PyramidLoader {
            cache_limit: self.tiles.cache_limit,
        });
        factory.register(PatternLoader {
            tile_size: self.tiles.tile_size,
            scale: self.tiles.document_scale,
            cache_limit: self.tiles.cache_limit,
        });
        factory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r##"
[wall]
screen_width = 3840
screen_height = 1080
screens_x = 2
screens_y = 3
mullion_width = 14
mullion_height = 12

[tiles]
fetch_threads = 4
cache_limit = 128

[render]
background_color = "#242424"
max_frames = 10

[session]
content = ["city.pyr", "8192x4096.pattern"]
"##;

    #[test]
    fn test_parse_full_config() {
        let config = WallConfig::from_toml(CONFIG).unwrap();
        let layout = config.layout();
        assert_eq!(layout.total_size(), Size::new(7694, 3264));
        assert_eq!(config.node_count(), 6);
        assert_eq!(config.tiles.fetch_threads, 4);
        assert_eq!(config.tiles.cache_limit, Some(128));
        assert_eq!(config.tiles.tile_size, DEFAULT_TILE_SIZE);
        assert_eq!(config.render.max_frames, 10);
        assert_eq!(config.session.content.len(), 2);
        assert_eq!(config.options().background_color, Color::rgb(0x24, 0x24, 0x24));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = WallConfig::from_toml("").unwrap();
        assert_eq!(config.layout(), WallLayout::default());
        assert_eq!(config.node_count(), 1);
        assert_eq!(config.collective_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            WallConfig::from_toml("[cluster]\nnodes = 4\n"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            WallConfig::from_toml("[render]\nbackground_color = \"red\"\n"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            WallConfig::from_toml("[wall]\nscreens_x = 0\n"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            WallConfig::from_toml("[wall\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wall.toml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = WallConfig::load(Some(&path)).unwrap();
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(WallConfig::load(Some(&missing)), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_factory_supports_configured_loaders() {
        let config = WallConfig::from_toml(CONFIG).unwrap();
        let factory = config.data_source_factory();
        assert!(factory.supports("city.pyr"));
        let source = factory.get("8192x4096.pattern", 0).unwrap();
        assert_eq!(source.lod_tools().tile_size(), DEFAULT_TILE_SIZE);
    }
}
