//! Store configuration.
//!
//! This module provides configuration for the multiplexed stream store.

use crate::format::HEADER_SIZE;

/// Multiplexed store configuration parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Size of one physical block in bytes (default: 4KB).
    ///
    /// Every block ends with a 4 byte link to the next block of its stream,
    /// so the usable payload is `block_size - 4`.
    pub block_size: u32,

    /// Maximum number of blocks the file may grow to (default: `u32::MAX`).
    ///
    /// Allocation beyond this limit fails with a capacity error.
    pub max_blocks: u32,

    /// Recycle IDs of streams that were closed without any data.
    pub reuse_stream_ids: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            block_size: 4 * 1024, // 4KB
            max_blocks: u32::MAX,
            reuse_stream_ids: true,
        }
    }
}

impl StoreConfig {
    /// Create a new store configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set block size (builder pattern).
    pub fn with_block_size(mut self, size: u32) -> Self {
        self.block_size = size;
        self
    }

    /// Set the block limit (builder pattern).
    pub fn with_max_blocks(mut self, blocks: u32) -> Self {
        self.max_blocks = blocks;
        self
    }

    /// Enable or disable stream ID recycling (builder pattern).
    pub fn with_reuse_stream_ids(mut self, reuse: bool) -> Self {
        self.reuse_stream_ids = reuse;
        self
    }

    /// Usable bytes per block.
    #[inline]
    pub fn payload_size(&self) -> usize {
        self.block_size as usize - crate::format::BLOCK_LINK_SIZE
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), StoreConfigError> {
        if (self.block_size as usize) < HEADER_SIZE {
            return Err(StoreConfigError::BlockSizeTooSmall(self.block_size));
        }
        if self.max_blocks < 2 {
            return Err(StoreConfigError::TooFewBlocks(self.max_blocks));
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small blocks).
    pub fn for_testing() -> Self {
        StoreConfig {
            block_size: 128,
            max_blocks: u32::MAX,
            reuse_stream_ids: true,
        }
    }
}

/// Store configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreConfigError {
    /// Block too small to hold the file header.
    #[error("Block size {0} is smaller than the {HEADER_SIZE} byte header")]
    BlockSizeTooSmall(u32),

    /// The header block alone uses one block.
    #[error("Block limit {0} leaves no room for data blocks")]
    TooFewBlocks(u32),
}

impl From<StoreConfigError> for tracestore_core::Error {
    fn from(e: StoreConfigError) -> Self {
        tracestore_core::Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.payload_size(), 4092);
        assert!(config.reuse_stream_ids);
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .with_block_size(512)
            .with_max_blocks(100)
            .with_reuse_stream_ids(false);

        assert_eq!(config.block_size, 512);
        assert_eq!(config.max_blocks, 100);
        assert!(!config.reuse_stream_ids);
    }

    #[test]
    fn test_validation_block_too_small() {
        let config = StoreConfig::new().with_block_size(32);
        assert!(matches!(
            config.validate(),
            Err(StoreConfigError::BlockSizeTooSmall(32))
        ));
    }

    #[test]
    fn test_validation_too_few_blocks() {
        let config = StoreConfig::new().with_max_blocks(1);
        assert!(matches!(
            config.validate(),
            Err(StoreConfigError::TooFewBlocks(1))
        ));
    }

    #[test]
    fn test_testing_config() {
        let config = StoreConfig::for_testing();
        assert!(config.validate().is_ok());
        assert!(config.block_size < StoreConfig::default().block_size);
    }
}
