//! Target configuration.
//!
//! Sector size, capacity and dispatch mode are fixed once a unit exists. The
//! two discard toggles are only the initial values; a live unit can flip them.

use crate::{Error, Result, PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default logical block size in bytes.
pub const DEFAULT_SECTOR_SIZE: u32 = 512;

/// Default number of logical blocks (512 MiB at the default sector size).
pub const DEFAULT_CAPACITY_BLOCKS: u32 = 1024 * 1024;

/// Configuration applied to every logical unit a host creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Size of a logical block in bytes.
    #[serde(default = "default_sector_size")]
    pub sector_size: u32,

    /// Number of logical blocks in the device.
    #[serde(default = "default_capacity_blocks")]
    pub capacity_blocks: u32,

    /// Skip the data copy for WRITE(6)/WRITE(10).
    #[serde(default)]
    pub discard_writes: bool,

    /// Skip the data copy for READ(6)/READ(10).
    #[serde(default)]
    pub discard_reads: bool,

    /// Execute commands on a dedicated per-unit thread instead of inline.
    #[serde(default)]
    pub use_worker_thread: bool,
}

fn default_sector_size() -> u32 {
    DEFAULT_SECTOR_SIZE
}

fn default_capacity_blocks() -> u32 {
    DEFAULT_CAPACITY_BLOCKS
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
            capacity_blocks: DEFAULT_CAPACITY_BLOCKS,
            discard_writes: false,
            discard_reads: false,
            use_worker_thread: false,
        }
    }
}

impl TargetConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the logical block size.
    #[must_use]
    pub fn with_sector_size(mut self, sector_size: u32) -> Self {
        self.sector_size = sector_size;
        self
    }

    /// Set the number of logical blocks.
    #[must_use]
    pub fn with_capacity_blocks(mut self, capacity_blocks: u32) -> Self {
        self.capacity_blocks = capacity_blocks;
        self
    }

    /// Set the initial discard-writes toggle.
    #[must_use]
    pub fn with_discard_writes(mut self, discard: bool) -> Self {
        self.discard_writes = discard;
        self
    }

    /// Set the initial discard-reads toggle.
    #[must_use]
    pub fn with_discard_reads(mut self, discard: bool) -> Self {
        self.discard_reads = discard;
        self
    }

    /// Select queued (worker thread) or inline dispatch.
    #[must_use]
    pub fn with_worker_thread(mut self, enabled: bool) -> Self {
        self.use_worker_thread = enabled;
        self
    }

    /// Device capacity in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> u64 {
        u64::from(self.capacity_blocks) * u64::from(self.sector_size)
    }

    /// Number of backing pages needed for the capacity.
    #[must_use]
    pub fn page_count(&self) -> u64 {
        self.capacity_bytes().div_ceil(PAGE_SIZE as u64)
    }

    /// Check that the configuration describes a usable device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a zero sector size, zero capacity,
    /// or a capacity that cannot be addressed on this platform.
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 {
            return Err(Error::InvalidConfig("sector_size must be non-zero".to_string()));
        }
        if self.capacity_blocks == 0 {
            return Err(Error::InvalidConfig("capacity_blocks must be non-zero".to_string()));
        }
        if usize::try_from(self.capacity_bytes()).is_err() {
            return Err(Error::InvalidConfig(format!(
                "capacity of {} bytes is not addressable",
                self.capacity_bytes()
            )));
        }
        Ok(())
    }

    /// Parse a configuration from TOML text. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the text is not valid TOML for this type,
    /// or the validation error if the values are unusable.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }
}
