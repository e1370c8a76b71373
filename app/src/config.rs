//! Loading runtime settings from TOML.

use std::path::{Path, PathBuf};

use strand_ecs::{ConfigError, RuntimeConfig, RuntimeOptions};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(#[from] ConfigError),
}

/// Reads `path`. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<RuntimeConfig, LoadError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("config file {} not found, using defaults", path.display());
            return Ok(RuntimeConfig::default());
        }
        Err(source) => {
            return Err(LoadError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    toml::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Validates `config` into runtime options.
pub fn to_options(config: &RuntimeConfig) -> Result<RuntimeOptions, LoadError> {
    Ok(config.validate()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("strand-sim-{}-{}.toml", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("strand-sim-does-not-exist.toml");
        assert_eq!(load_config(&path).unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn reads_sections() {
        let path = temp_file(
            "sections",
            "[runtime]\nname = \"sim\"\n\n[frame]\ntarget_fps = 50.0\ntotal_frames = 5\n",
        );
        let config = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        let options = to_options(&config).unwrap();
        assert_eq!(options.name, "sim");
        assert_eq!(options.frame.unwrap().total_frames, 5);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let path = temp_file("malformed", "[runtime\nname = 1\n");
        let err = load_config(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn invalid_values_are_reported() {
        let config: RuntimeConfig = toml::from_str("[runtime]\ngc_interval_ms = 0\n").unwrap();
        assert!(matches!(
            to_options(&config),
            Err(LoadError::Invalid(ConfigError::ZeroGcInterval))
        ));
    }
}
