//! Configuration parsing and structures

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::env;
use crate::storage::share::ShareParams;

// =============================================================================
// Raw Config (Deserialized from YAML)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// This is converted to `Config` via `resolve()`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Values inherited by every mount that doesn't set its own
    #[serde(default)]
    pub defaults: MountDefaults,

    pub mounts: Vec<RawMountConfig>,
}

/// Top-level mount defaults section
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MountDefaults {
    pub transport: Option<TransportConfig>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub diagnostics: Option<bool>,
    pub cache: Option<CacheConfig>,
    pub staging_dir: Option<PathBuf>,
}

/// Raw mount configuration before resolution
#[derive(Debug, Clone, Deserialize)]
pub struct RawMountConfig {
    /// Name the mount is addressed by
    pub name: String,
    pub transport: Option<TransportConfig>,
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub share: Option<String>,
    /// Directory inside the share the mount is scoped to
    pub root: Option<String>,
    pub diagnostics: Option<bool>,
    pub cache: Option<CacheConfig>,
    pub staging_dir: Option<PathBuf>,
}

/// How the share is reached
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Shares are subdirectories of `base_dir`
    Local { base_dir: PathBuf },
    /// Empty in-process share, for trying a configuration out
    Memory,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig)
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub mounts: Vec<MountConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// A single share mount (resolved)
#[derive(Debug, Clone)]
pub struct MountConfig {
    pub name: String,
    pub transport: TransportConfig,
    /// Everything the storage adapter itself is configured with
    pub share: ShareParams,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config by merging mounts with defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            defaults,
            mounts,
        } = self;

        let mounts = mounts
            .into_iter()
            .map(|raw| Self::resolve_mount(&defaults, raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config { logging, mounts })
    }

    fn resolve_mount(defaults: &MountDefaults, raw: RawMountConfig) -> Result<MountConfig, ConfigError> {
        let transport = raw
            .transport
            .or_else(|| defaults.transport.clone())
            .ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Mount {:?} has no transport (either on the mount or in defaults)",
                    raw.name
                ))
            })?;

        let share = ShareParams {
            host: env::expand_opt(raw.host.or_else(|| defaults.host.clone()))?,
            user: env::expand_opt(raw.user.or_else(|| defaults.user.clone()))?,
            password: env::expand_opt(raw.password.or_else(|| defaults.password.clone()))?,
            share: env::expand_opt(raw.share)?,
            root: env::expand_opt(raw.root)?,
            diagnostics: raw.diagnostics.or(defaults.diagnostics).unwrap_or(false),
            cache: raw
                .cache
                .or_else(|| defaults.cache.clone())
                .unwrap_or_default(),
            staging_dir: raw.staging_dir.or_else(|| defaults.staging_dir.clone()),
        };

        let missing: Vec<&str> = [
            ("host", &share.host),
            ("user", &share.user),
            ("password", &share.password),
            ("share", &share.share),
        ]
        .into_iter()
        .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "Mount {:?} is missing {}",
                raw.name,
                missing.join(", ")
            )));
        }

        Ok(MountConfig {
            name: raw.name,
            transport,
            share,
        })
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mounts.is_empty() {
            return Err(ConfigError::ValidationError(
                "At least one mount is required".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for mount in &self.mounts {
            if !names.insert(mount.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate mount name: {:?}",
                    mount.name
                )));
            }
            if mount.share.cache.capacity == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Mount {:?}: cache capacity must be positive",
                    mount.name
                )));
            }
        }

        Ok(())
    }

    pub fn mount(&self, name: &str) -> Option<&MountConfig> {
        self.mounts.iter().find(|m| m.name == name)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
