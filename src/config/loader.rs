//! Environment-aware configuration loading.
//!
//! Configuration lives in YAML: a base `propcast.yaml` plus an optional
//! `propcast-{environment}.yaml` overlay merged over it. The environment
//! comes from `PROPCAST_ENV` (falling back to `APP_ENV`, then
//! "development"), matching the logging layer's detection.

use serde_yaml::Value as YamlValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::PropcastConfig;
use crate::error::{PropcastError, Result};
use crate::logging::detect_environment;

/// Loaded configuration plus the context it was loaded from
#[derive(Debug)]
pub struct ConfigManager {
    config: PropcastConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection from the default
    /// config directory.
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment. Useful for tests that must not
    /// mutate process environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            database_host = %config.database.host,
            systems = config.quality.systems.len(),
            "Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Manager wrapping an already-built config, for tests and embedding
    pub fn from_config(config: PropcastConfig, environment: &str) -> Arc<ConfigManager> {
        Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::new(),
        })
    }

    pub fn config(&self) -> &PropcastConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("PROPCAST_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge(directory: &Path, environment: &str) -> Result<PropcastConfig> {
        let base_path = directory.join("propcast.yaml");
        let overlay_path = directory.join(format!("propcast-{environment}.yaml"));

        let mut merged = if base_path.exists() {
            Self::read_yaml(&base_path)?
        } else {
            debug!(
                path = %base_path.display(),
                "No base config file; starting from defaults"
            );
            YamlValue::Mapping(serde_yaml::Mapping::new())
        };

        if overlay_path.exists() {
            let overlay = Self::read_yaml(&overlay_path)?;
            Self::merge_values(&mut merged, overlay);
            debug!(path = %overlay_path.display(), "Environment overlay applied");
        }

        serde_yaml::from_value(merged)
            .map_err(|e| PropcastError::configuration(format!("invalid configuration: {e}")))
    }

    fn read_yaml(path: &Path) -> Result<YamlValue> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PropcastError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            PropcastError::configuration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Recursive mapping merge: overlay scalars and sequences replace base
    /// values, overlay mappings merge key-by-key.
    fn merge_values(base: &mut YamlValue, overlay: YamlValue) {
        match (base, overlay) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    match base_map.get_mut(&key) {
                        Some(base_value) => Self::merge_values(base_value, overlay_value),
                        None => {
                            base_map.insert(key, overlay_value);
                        }
                    }
                }
            }
            (base_slot, overlay_value) => *base_slot = overlay_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        write!(file, "{contents}").unwrap();
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().dispatch.inter_publish_delay_ms, 10);
    }

    #[test]
    fn test_overlay_merges_over_base() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "propcast.yaml",
            "dispatch:\n  inter_publish_delay_ms: 25\n  work_queue: base_queue\n",
        );
        write_file(
            dir.path(),
            "propcast-test.yaml",
            "dispatch:\n  inter_publish_delay_ms: 0\n",
        );

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        let dispatch = &manager.config().dispatch;
        // Overlay wins where it speaks, base survives where it does not
        assert_eq!(dispatch.inter_publish_delay_ms, 0);
        assert_eq!(dispatch.work_queue, "base_queue");
    }

    #[test]
    fn test_invalid_values_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "propcast.yaml",
            "orchestration:\n  max_trigger_attempts: 0\n",
        );
        let err = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "test",
        )
        .unwrap_err();
        assert!(format!("{err}").contains("max_trigger_attempts"));
    }
}
