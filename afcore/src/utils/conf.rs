use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    magic::{CACHE_MIN_REQUIRED_VERSION, ENV_CONFIG_PATH},
    utils::error::{AfError, AfResult},
};

/// User configuration of the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Reuse formulas computed by a previous run on the same image.
    pub persistent_cache: bool,
    /// Directory holding cache files. Defaults to the current directory.
    pub cache_dir: Option<PathBuf>,
    /// Caches older than this format version are ignored. Never lower than
    /// the oldest version this crate can read.
    pub min_cache_version: i32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            persistent_cache: false,
            cache_dir: None,
            min_cache_version: CACHE_MIN_REQUIRED_VERSION,
        }
    }
}

impl AnalysisConfig {
    /// Get the default path to the configuration file.
    pub fn default_path() -> PathBuf {
        // Check if the environment variable is set
        if let Ok(config_path) = std::env::var(ENV_CONFIG_PATH) {
            return config_path.into();
        }

        let mut path = PathBuf::new();

        #[cfg(target_os = "windows")]
        {
            if let Ok(appdata) = std::env::var("APPDATA") {
                path.push(appdata);
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
                path.push(xdg_config_home);
            } else if let Ok(home) = std::env::var("HOME") {
                path.push(home);
                path.push(".config");
            }
        }

        path.push("afengine");
        path.push("config.toml");
        path
    }

    /// Load the configuration from a TOML file.
    pub fn load_from_toml(path: &Path) -> AfResult<Self> {
        let toml_str = std::fs::read_to_string(path)?;
        Self::from_toml_str(&toml_str, path)
    }

    fn from_toml_str(toml_str: &str, path: &Path) -> AfResult<Self> {
        toml::from_str(toml_str).map_err(|e| AfError::ConfigParseError {
            source: e,
            file: path.display().to_string(),
        })
    }

    /// Save the configuration to a TOML file, creating parent directories.
    pub fn save_to_toml(&self, path: &Path) -> AfResult<()> {
        let toml_str = toml::to_string(self).map_err(|e| {
            AfError::ConfigSerializeError(format!(
                "Failed during serialization of TOML to path `{}`: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Load the configuration from [`AnalysisConfig::default_path`], falling
    /// back to defaults when the file does not exist.
    pub fn load_or_default() -> AfResult<Self> {
        let path = Self::default_path();
        if !path.exists() {
            log::debug!(
                "No configuration at `{}`, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load_from_toml(&path)
    }

    /// Directory cache files are read from and written to.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Lowest cache format version accepted on load.
    pub fn effective_min_version(&self) -> i32 {
        self.min_cache_version.max(CACHE_MIN_REQUIRED_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let conf = AnalysisConfig::from_toml_str("persistent_cache = true\n", Path::new("x.toml"))
            .unwrap();
        assert!(conf.persistent_cache);
        assert_eq!(conf.cache_dir, None);
        assert_eq!(conf.min_cache_version, CACHE_MIN_REQUIRED_VERSION);
        assert_eq!(conf.cache_dir(), PathBuf::from("."));
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = AnalysisConfig::from_toml_str("persistent_cache = 3", Path::new("bad.toml"))
            .unwrap_err();
        match err {
            AfError::ConfigParseError { file, .. } => assert_eq!(file, "bad.toml"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn min_version_is_clamped() {
        let conf = AnalysisConfig {
            min_cache_version: -4,
            ..Default::default()
        };
        assert_eq!(conf.effective_min_version(), CACHE_MIN_REQUIRED_VERSION);
    }
}
