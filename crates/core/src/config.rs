//! Engine configuration.
//!
//! Pool capacities and thread counts are runtime parameters rather than
//! compile-time array sizes. They are loaded from a TOML file and may be
//! overridden from the command line.
//!
//! ```toml
//! frames_in_flight = 2
//! max_worker_threads = 8
//! command_lists_per_pool = 16
//! descriptors_per_allocator = 4096
//! render_items_per_queue = 4096
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Sizing parameters for the frame engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Number of frame slots the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,
    /// Upper bound on worker threads; the actual count is
    /// `min(physical cores, max_worker_threads)`.
    pub max_worker_threads: usize,
    /// Cap on command lists per `[frame][thread]` pool. Must exceed 2.
    pub command_lists_per_pool: usize,
    /// Descriptor slots per `[frame][thread]` table allocator.
    pub descriptors_per_allocator: u32,
    /// Render items per `[pass][thread]` queue.
    pub render_items_per_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_worker_threads: 8,
            command_lists_per_pool: 16,
            descriptors_per_allocator: 4096,
            render_items_per_queue: 4096,
        }
    }
}

impl EngineConfig {
    /// Loads and validates a configuration file.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// holds values that fail [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text).map_err(|e| Error::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::ConfigParse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value can drive the engine.
    pub fn validate(&self) -> Result<()> {
        if self.frames_in_flight == 0 {
            return Err(Error::Config("frames_in_flight must be at least 1".into()));
        }
        if self.max_worker_threads == 0 {
            return Err(Error::Config("max_worker_threads must be at least 1".into()));
        }
        if self.command_lists_per_pool <= 2 {
            return Err(Error::Config(format!(
                "command_lists_per_pool must be greater than 2 (got {})",
                self.command_lists_per_pool
            )));
        }
        if self.descriptors_per_allocator == 0 {
            return Err(Error::Config(
                "descriptors_per_allocator must be non-zero".into(),
            ));
        }
        if self.render_items_per_queue == 0 {
            return Err(Error::Config("render_items_per_queue must be non-zero".into()));
        }
        Ok(())
    }

    /// Number of worker threads to spawn on this machine.
    pub fn worker_thread_count(&self) -> usize {
        let physical = num_cpus::get_physical();
        let count = physical.min(self.max_worker_threads).max(1);
        debug!(
            "Worker threads: {} ({} physical cores, cap {})",
            count, physical, self.max_worker_threads
        );
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str("max_worker_threads = 3\n").unwrap();
        assert_eq!(config.max_worker_threads, 3);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.command_lists_per_pool, 16);
    }

    #[test]
    fn test_rejects_small_command_pool() {
        let err = EngineConfig::from_toml_str("command_lists_per_pool = 2\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = EngineConfig::from_toml_str("frames = 3\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { .. }));
    }

    #[test]
    fn test_worker_thread_count_respects_cap() {
        let config = EngineConfig {
            max_worker_threads: 1,
            ..EngineConfig::default()
        };
        assert_eq!(config.worker_thread_count(), 1);
    }
}
