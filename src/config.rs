//! Arena configuration
//!
//! Parameters can be given in code, parsed from TOML, or layered from an
//! optional TOML file plus `SLAB_ARENA_*` environment variables:
//!
//! ```toml
//! start_chunk_size = 64
//! slab_size = 1048576
//! growth_factor = 1.25
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default chunk size of the first slab class (bytes)
pub const DEFAULT_START_CHUNK_SIZE: usize = 64;

/// Default slab size (bytes)
pub const DEFAULT_SLAB_SIZE: usize = 1024 * 1024;

/// Default ratio between consecutive chunk sizes
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Environment variable prefix used by [`ArenaConfig::load`]
pub const ENV_PREFIX: &str = "SLAB_ARENA";

/// Slab arena parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Chunk size of the first slab class
    pub start_chunk_size: usize,
    /// Bytes per slab; also the largest request the arena will serve
    pub slab_size: usize,
    /// Ratio between consecutive chunk sizes, must be greater than 1
    pub growth_factor: f64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            start_chunk_size: DEFAULT_START_CHUNK_SIZE,
            slab_size: DEFAULT_SLAB_SIZE,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl ArenaConfig {
    /// Create a configuration from explicit parameters
    pub fn new(start_chunk_size: usize, slab_size: usize, growth_factor: f64) -> Self {
        Self {
            start_chunk_size,
            slab_size,
            growth_factor,
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)
            .map_err(|e| Error::Config(format!("Failed to parse arena config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from an optional TOML file, then `SLAB_ARENA_*` environment
    /// variables, on top of the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`load`](Self::load), but reads `SLAB_ARENA_*` variables from
    /// `env` instead of the process environment when it is given
    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to load arena config: {}", e)))?;

        let cfg: Self = settings
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Invalid arena config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check the parameters describe a usable arena
    pub fn validate(&self) -> Result<()> {
        if self.start_chunk_size == 0 {
            return Err(Error::InvalidArgument(
                "start_chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.slab_size == 0 {
            return Err(Error::InvalidArgument(
                "slab_size must be greater than zero".to_string(),
            ));
        }
        if self.slab_size > u32::MAX as usize {
            return Err(Error::InvalidArgument(format!(
                "slab_size {} exceeds {}",
                self.slab_size,
                u32::MAX
            )));
        }
        if self.start_chunk_size > self.slab_size {
            return Err(Error::InvalidArgument(format!(
                "start_chunk_size {} exceeds slab_size {}",
                self.start_chunk_size, self.slab_size
            )));
        }
        if !self.growth_factor.is_finite() || self.growth_factor <= 1.0 {
            return Err(Error::InvalidArgument(format!(
                "growth_factor must be a finite number greater than 1, got {}",
                self.growth_factor
            )));
        }
        Ok(())
    }
}
