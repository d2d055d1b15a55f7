//! Loader configuration.
//!
//! Settings can be built in code with the `with_*` methods or read from an
//! INI file:
//!
//! ```ini
//! [application]
//! name = game
//! platform = linux
//! version = latest
//!
//! [network]
//! servers = https://cdn1.example.com/content, https://cdn2.example.com/content
//! background = true
//! offline = false
//! timeout = 300
//!
//! [cache]
//! directory = ~/.cache/content-loader
//! ```
//!
//! Missing keys keep their defaults; a missing file yields
//! [`LoaderConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::transport::DEFAULT_TIMEOUT_SECS;

/// Application name used when none is configured.
pub const DEFAULT_APPLICATION_NAME: &str = "default";

/// Content version used when none is configured.
pub const DEFAULT_VERSION: &str = "latest";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    Read(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Settings for [`ContentLoader::from_config`](crate::loader::ContentLoader::from_config).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Names the application cache and the `<name>.manifest` resource.
    pub application_name: String,
    /// Selects the package list inside a manifest version.
    pub platform_name: String,
    /// Manifest version to load.
    pub version: String,
    /// Run the content server on a worker thread.
    pub background: bool,
    /// Content origins, in registration order.
    pub servers: Vec<String>,
    /// Serve the application manifest from cache.
    pub offline: bool,
    /// Root directory of the on-disk caches.
    pub cache_dir: PathBuf,
    pub request_timeout_secs: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            platform_name: String::new(),
            version: DEFAULT_VERSION.to_string(),
            background: true,
            servers: Vec::new(),
            offline: false,
            cache_dir: default_cache_dir(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LoaderConfig {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform_name = platform.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs();
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load configuration from an INI file.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Read(ini::Error::Parse(e)))?;
        parse_ini(&ini)
    }
}

/// Default cache root (`<user cache dir>/content-loader`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("content-loader")
}

fn parse_ini(ini: &Ini) -> Result<LoaderConfig, ConfigError> {
    let mut config = LoaderConfig::default();

    // [application] section
    if let Some(section) = ini.section(Some("application")) {
        if let Some(v) = section.get("name") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("application", "name", v, "must not be empty"));
            }
            config.application_name = v.to_string();
        }
        if let Some(v) = section.get("platform") {
            config.platform_name = v.trim().to_string();
        }
        if let Some(v) = section.get("version") {
            let v = v.trim();
            if v.is_empty() {
                return Err(invalid("application", "version", v, "must not be empty"));
            }
            config.version = v.to_string();
        }
    }

    // [network] section
    if let Some(section) = ini.section(Some("network")) {
        if let Some(v) = section.get("servers") {
            config.servers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = section.get("background") {
            config.background = parse_bool("network", "background", v)?;
        }
        if let Some(v) = section.get("offline") {
            config.offline = parse_bool("network", "offline", v)?;
        }
        if let Some(v) = section.get("timeout") {
            let secs: u64 = v
                .trim()
                .parse()
                .map_err(|_| invalid("network", "timeout", v, "expected whole seconds"))?;
            if secs == 0 {
                return Err(invalid("network", "timeout", v, "must be at least 1"));
            }
            config.request_timeout_secs = secs;
        }
    }

    // [cache] section
    if let Some(section) = ini.section(Some("cache")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.cache_dir = expand_tilde(v);
            }
        }
    }

    Ok(config)
}

fn parse_bool(section: &str, key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "expected true or false")),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.application_name, "default");
        assert_eq!(config.platform_name, "");
        assert_eq!(config.version, "latest");
        assert!(config.background);
        assert!(config.servers.is_empty());
        assert!(!config.offline);
        assert!(config.cache_dir.ends_with("content-loader"));
        assert_eq!(config.request_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_builder_methods() {
        let config = LoaderConfig::new("game")
            .with_platform("ps3")
            .with_version("1.0.2")
            .with_background(false)
            .with_servers(["https://a", "https://b"])
            .with_offline(true)
            .with_cache_dir("/tmp/c")
            .with_request_timeout(Duration::from_secs(30));

        assert_eq!(config.application_name, "game");
        assert_eq!(config.platform_name, "ps3");
        assert_eq!(config.version, "1.0.2");
        assert!(!config.background);
        assert_eq!(config.servers, vec!["https://a", "https://b"]);
        assert!(config.offline);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/c"));
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = LoaderConfig::load_from(&temp_dir.path().join("missing.ini")).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("loader.ini");
        std::fs::write(
            &path,
            "[application]\nname = game\nplatform = x\n\n\
             [network]\nservers = https://a/content, https://b/content,\nbackground = no\ntimeout = 20\n\n\
             [cache]\ndirectory = /var/cache/game\n",
        )
        .unwrap();

        let config = LoaderConfig::load_from(&path).unwrap();
        assert_eq!(config.application_name, "game");
        assert_eq!(config.platform_name, "x");
        assert_eq!(config.version, "latest");
        assert_eq!(
            config.servers,
            vec!["https://a/content", "https://b/content"]
        );
        assert!(!config.background);
        assert_eq!(config.request_timeout_secs, 20);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/game"));
    }

    #[test]
    fn test_invalid_values() {
        let err = LoaderConfig::from_ini_str("[network]\nbackground = maybe\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "background"
        ));

        let err = LoaderConfig::from_ini_str("[network]\ntimeout = soon\n").unwrap_err();
        assert!(err.to_string().contains("network.timeout"));

        assert!(LoaderConfig::from_ini_str("[network]\ntimeout = 0\n").is_err());
        assert!(LoaderConfig::from_ini_str("[application]\nname =\n").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/cache"), home.join("cache"));
        }
    }
}
