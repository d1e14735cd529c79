//! Configuration file loading

use super::Config;
use anyhow::{Context, Result};
use std::path::Path;

/// Looked up when no `--config` is given
const DEFAULT_CONFIG_PATH: &str = "./onionprobe.toml";

/// Load from `path`, else the default location, else built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_from_path(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_from_path(Path::new(DEFAULT_CONFIG_PATH))
        },
        None => {
            let config = Config::default();
            super::validate(&config)?;
            Ok(config)
        },
    }
}

/// Load and parse config from path
pub fn load_from_path(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    super::validate(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onionprobe.toml");
        std::fs::write(&path, "[probe]\nparallelism = 3\n").unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.probe.parallelism, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load_from_path(Path::new("/nonexistent/onionprobe.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onionprobe.toml");
        std::fs::write(&path, "[probe]\nparallelism = 0\n").unwrap();

        assert!(load_from_path(&path).is_err());
    }
}
