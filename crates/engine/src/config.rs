//! Session configuration via `tracestore.toml`
//!
//! A session is configured once, at creation. The same settings can be
//! loaded from a TOML file so that an agent launcher only needs a path.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracestore_codec::DEFAULT_GZIP_LEVEL;
use tracestore_core::FormatTag;
use tracestore_storage::{StoreConfig, StoreConfigError};

/// Conventional config file name.
pub const CONFIG_FILE_NAME: &str = "tracestore.toml";

/// Session configuration loaded from `tracestore.toml`.
///
/// # Example
///
/// ```toml
/// # Sequence codec: "sequitur" (default), "gzip", "uncompressed" or "debug"
/// format = "sequitur"
/// block_size = 4096
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Sequence codec name.
    pub format: String,
    /// Physical block size in bytes.
    pub block_size: u32,
    /// Block limit of the store file.
    pub max_blocks: u32,
    /// Recycle IDs of streams closed without data.
    pub reuse_stream_ids: bool,
    /// Gzip level for the gzip codec and the metadata streams.
    pub gzip_level: u32,
    /// Create threads paused until `start_tracing()` is called.
    pub deferred_start: bool,
    /// Log grammar statistics and report success at finish.
    pub debug: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        TraceConfig {
            format: FormatTag::Sequitur.name().to_string(),
            block_size: store.block_size,
            max_blocks: store.max_blocks,
            reuse_stream_ids: store.reuse_stream_ids,
            gzip_level: DEFAULT_GZIP_LEVEL,
            deferred_start: false,
            debug: false,
        }
    }
}

impl TraceConfig {
    /// Default configuration with `format` as the codec.
    pub fn with_format(format: FormatTag) -> Self {
        TraceConfig {
            format: format.name().to_string(),
            ..Self::default()
        }
    }

    /// Parse the codec name.
    pub fn format_tag(&self) -> Result<FormatTag, ConfigError> {
        FormatTag::from_name(&self.format).ok_or_else(|| ConfigError::UnknownFormat(self.format.clone()))
    }

    /// Store settings derived from this config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new()
            .with_block_size(self.block_size)
            .with_max_blocks(self.max_blocks)
            .with_reuse_stream_ids(self.reuse_stream_ids)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.format_tag()?;
        if self.gzip_level > 9 {
            return Err(ConfigError::GzipLevel(self.gzip_level));
        }
        self.store_config().validate()?;
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# tracestore session configuration
#
# Sequence codec: "sequitur" (default), "gzip", "uncompressed" or "debug"
#   "sequitur"     = delta values in one shared grammar, best for loops
#   "gzip"         = one deflate stream per sequence
#   "uncompressed" = raw fixed-width values, fastest to write
#   "debug"        = discard all values
format = "sequitur"

# Physical block size in bytes (minimum 64)
block_size = 4096

# Block limit of the trace file
max_blocks = 4294967295

# Recycle IDs of streams that were closed without data
reuse_stream_ids = true

# Gzip level 0-9 for the gzip codec and the metadata streams
gzip_level = 6

# Keep threads paused until tracing is started explicitly
deferred_start = false

# Report grammar statistics at finish
debug = false
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: TraceConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Render this config as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}

/// Session configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Codec name not recognised.
    #[error("Unknown trace format '{0}', expected \"sequitur\", \"gzip\", \"uncompressed\" or \"debug\"")]
    UnknownFormat(String),

    /// Gzip level out of range.
    #[error("Gzip level {0} outside 0-9")]
    GzipLevel(u32),

    /// Invalid store settings.
    #[error(transparent)]
    Store(#[from] StoreConfigError),

    /// Config file unreadable.
    #[error("Failed to read config file '{path}': {message}")]
    Read {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid TOML for this schema.
    #[error("Failed to parse config file '{path}': {message}")]
    Parse {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Config could not be rendered.
    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    /// Config file not writable.
    #[error("Failed to write config file '{path}': {message}")]
    Write {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },
}

impl From<ConfigError> for tracestore_core::Error {
    fn from(e: ConfigError) -> Self {
        tracestore_core::Error::Config(e.to_string())
    }
}
