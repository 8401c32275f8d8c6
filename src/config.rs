//! Configuration parsing and management for the avatar configurator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfiguratorError};

/// Environment variable that overrides `backend.url`
pub const BACKEND_URL_ENV: &str = "POCKETBASE_URL";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub export: ExportConfig,
    pub skin: SkinConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfiguratorError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> Result<Self, ConfiguratorError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, ConfiguratorError> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Apply environment overrides on top of the file configuration
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BACKEND_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!("Backend URL taken from {}", BACKEND_URL_ENV);
                self.backend.url = Some(url.trim().to_string());
            }
        }
        self
    }

    /// Validate the configuration.
    ///
    /// A missing backend URL is fatal: nothing downstream can build asset
    /// URLs without it.
    pub fn validate(&self) -> Result<(), ConfiguratorError> {
        match self.backend.url.as_deref().map(str::trim) {
            None | Some("") => {
                return Err(ConfigError::MissingField(format!(
                    "backend.url (or {})",
                    BACKEND_URL_ENV
                ))
                .into());
            }
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Err(ConfigError::InvalidValue {
                    field: "backend.url".to_string(),
                    message: format!("'{}' is not an http(s) URL", url),
                }
                .into());
            }
            Some(_) => {}
        }

        if self.backend.categories_collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.categories_collection".to_string(),
                message: "Collection name must not be empty".to_string(),
            }
            .into());
        }

        if self.backend.assets_collection.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.assets_collection".to_string(),
                message: "Collection name must not be empty".to_string(),
            }
            .into());
        }

        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "backend.timeout_secs".to_string(),
                message: "Timeout must be greater than 0".to_string(),
            }
            .into());
        }

        if !(0.0..=1.0).contains(&self.skin.roughness) {
            return Err(ConfigError::InvalidValue {
                field: "skin.roughness".to_string(),
                message: "Roughness must be between 0.0 and 1.0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Record store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the record store
    pub url: Option<String>,
    /// Collection holding customization categories
    pub categories_collection: String,
    /// Collection holding customization assets
    pub assets_collection: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: None,
            categories_collection: "CustomizationGroups".to_string(),
            assets_collection: "CustomizationAssets".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Export output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory exported models are written to
    pub output_dir: PathBuf,
    /// File name prefix, followed by the epoch milliseconds
    pub file_prefix: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            file_prefix: "avatar".to_string(),
        }
    }
}

/// Shared skin material defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinConfig {
    /// Initial skin colour
    pub color: String,
    /// Material roughness (0.0 - 1.0)
    pub roughness: f32,
}

impl Default for SkinConfig {
    fn default() -> Self {
        Self {
            color: "#f5c6a5".to_string(),
            roughness: 1.0,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("avatar-configurator");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/avatar-configurator");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/avatar-configurator");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("avatar-configurator");
        }
    }

    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.backend.url.is_none());
        assert_eq!(config.backend.categories_collection, "CustomizationGroups");
        assert_eq!(config.backend.assets_collection, "CustomizationAssets");
        assert_eq!(config.export.file_prefix, "avatar");
        assert_eq!(config.skin.color, "#f5c6a5");
    }

    #[test]
    fn test_missing_backend_url_is_fatal() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfiguratorError::Config(ConfigError::MissingField(_))
        ));

        let mut config = Config::default();
        config.backend.url = Some("   ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_http_url() {
        let mut config = Config::default();
        config.backend.url = Some("ftp://records".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfiguratorError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r##"
            [backend]
            url = "http://127.0.0.1:8090"
            assets_collection = "Assets"

            [skin]
            color = "#aa8866"
        "##;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.backend.url.as_deref(), Some("http://127.0.0.1:8090"));
        assert_eq!(config.backend.assets_collection, "Assets");
        assert_eq!(config.backend.categories_collection, "CustomizationGroups");
        assert_eq!(config.skin.color, "#aa8866");
        assert!(config.validate().is_ok());
    }
}
