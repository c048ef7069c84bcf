//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use std::path::PathBuf;

    #[test]
    fn test_expand_env_vars_in_file() {
        std::env::set_var("MIZUCHI_STORE_TEST_DIR", "/srv/uploads");
        let content = "storage:\n  backend:\n    type: file\n    dir: ${MIZUCHI_STORE_TEST_DIR}\n";
        let config = ConfigLoader::from_yaml(content).unwrap();
        std::env::remove_var("MIZUCHI_STORE_TEST_DIR");

        assert_eq!(
            config.storage.backend,
            BackendConfig::File {
                dir: PathBuf::from("/srv/uploads")
            }
        );
    }

    #[test]
    fn test_validation_runs_on_load() {
        let content = "metrics:\n  enabled: true\n  address: nowhere\n";
        assert!(matches!(
            ConfigLoader::from_yaml(content),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::load("/definitely/not/here.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
