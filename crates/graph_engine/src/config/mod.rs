//! Engine configuration
//!
//! A single serializable [`EngineConfig`] covers the tunables of the graph
//! runtime: frames in flight, profiler window, aliasing threshold, budget
//! table and the shader cache directory. Loaded from TOML with defaults for
//! every field, so an empty file is a valid configuration.

use crate::resource::{BudgetResourceType, ResourceBudget};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid TOML for this schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// One budget table entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEntryConfig {
    /// Budget category: `host-memory`, `device-memory`, `command-buffers`,
    /// `descriptors`, or any custom name
    pub resource_type: String,
    /// Maximum allowed bytes, 0 meaning unlimited
    #[serde(default)]
    pub max_bytes: u64,
    /// Warn above this many bytes, 0 meaning no warning
    #[serde(default)]
    pub warning_threshold: u64,
    /// Fail allocations over the limit instead of warning
    #[serde(default)]
    pub strict: bool,
}

impl BudgetEntryConfig {
    /// The budget category this entry configures
    pub fn resource_type(&self) -> BudgetResourceType {
        match self.resource_type.as_str() {
            "host-memory" => BudgetResourceType::HostMemory,
            "device-memory" => BudgetResourceType::DeviceMemory,
            "command-buffers" => BudgetResourceType::CommandBuffers,
            "descriptors" => BudgetResourceType::Descriptors,
            custom => BudgetResourceType::Custom(custom.to_string()),
        }
    }

    /// The budget values of this entry
    pub fn budget(&self) -> ResourceBudget {
        ResourceBudget::new(self.max_bytes, self.warning_threshold, self.strict)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Frames the CPU may run ahead of the GPU
    pub frames_in_flight: u32,
    /// Rolling profiler window in frames
    pub profiler_frame_history: u32,
    /// Resources smaller than this are never aliased
    pub minimum_aliasing_size: u64,
    /// Directory for compiled shader stages
    pub shader_cache_dir: PathBuf,
    /// Per-type budget table
    pub budgets: Vec<BudgetEntryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            profiler_frame_history: 120,
            minimum_aliasing_size: 1024 * 1024,
            shader_cache_dir: PathBuf::from("shader_cache"),
            budgets: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();

        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.profiler_frame_history, 120);
        assert_eq!(config.minimum_aliasing_size, 1024 * 1024);
        assert!(config.budgets.is_empty());
    }

    #[test]
    fn test_budget_entries_parse() {
        let config: EngineConfig = toml::from_str(
            r#"
            frames_in_flight = 3

            [[budgets]]
            resource_type = "device-memory"
            max_bytes = 16777216
            strict = true

            [[budgets]]
            resource_type = "shadow-atlas"
            warning_threshold = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.budgets.len(), 2);
        assert_eq!(
            config.budgets[0].resource_type(),
            BudgetResourceType::DeviceMemory
        );
        assert!(config.budgets[0].budget().strict);
        assert_eq!(
            config.budgets[1].resource_type(),
            BudgetResourceType::Custom("shadow-atlas".to_string())
        );
    }
}
