//! Configuration parsing module
//!
//! Handles the `embedRedirects` section of a JSON5 configuration file plus
//! environment variable overrides. Every field has a default, so an absent
//! file or an empty section yields a working configuration.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default local site root
pub const DEFAULT_SITE_URL: &str = "http://localhost/";

/// Default route prefix for the verified redirect endpoint
pub const DEFAULT_ROUTE_PREFIX: &str = "verified-redirect";

/// Default query parameter carrying the checksum
pub const DEFAULT_CHECKSUM_PARAM: &str = "pwcc-er-checksum";

/// Default query parameter carrying the destination
pub const DEFAULT_DESTINATION_PARAM: &str = "verified-redirect";

/// Default storage key for the signing salt
pub const DEFAULT_SALT_OPTION: &str = "embed_redirects_salt";

/// Default checksum length in characters
pub const DEFAULT_CHECKSUM_LENGTH: usize = 10;

/// Smallest accepted checksum length
pub const MIN_CHECKSUM_LENGTH: usize = 4;

/// Largest accepted checksum length (a full hex-encoded SHA-256 MAC)
pub const MAX_CHECKSUM_LENGTH: usize = 64;

/// Config section holding this crate's settings
const CONFIG_SECTION: &str = "embedRedirects";

static ROUTE_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._~-]+(?:/[A-Za-z0-9._~-]+)*$").expect("route prefix regex"));
static PARAM_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._~-]+$").expect("param name regex"));

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Validation error at {path}: {message}")]
    ValidationError { path: String, message: String },
}

/// Deployment tier of the hosting site.
///
/// Production-like tiers default to permanent redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentType {
    Local,
    Development,
    Staging,
    #[default]
    Production,
}

impl EnvironmentType {
    /// Whether this tier is production or staging.
    pub fn is_production_like(self) -> bool {
        matches!(self, EnvironmentType::Production | EnvironmentType::Staging)
    }

    /// Parse a tier name. Unknown names are rejected.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(EnvironmentType::Local),
            "development" => Some(EnvironmentType::Development),
            "staging" => Some(EnvironmentType::Staging),
            "production" => Some(EnvironmentType::Production),
            _ => None,
        }
    }
}

/// Signed redirect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedirectConfig {
    /// Root URL of the local site
    pub site_url: String,
    /// Path prefix of the verified redirect endpoint, without slashes
    pub route_prefix: String,
    /// Query parameter carrying the checksum
    pub checksum_param: String,
    /// Query parameter carrying the destination
    pub destination_param: String,
    /// Whether the host serves descriptive paths (selects path-embedded links)
    pub descriptive_paths: bool,
    /// Deployment tier
    pub environment: EnvironmentType,
    /// Storage key for the signing salt
    pub salt_option: String,
    /// Checksum length in characters
    pub checksum_length: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        RedirectConfig {
            site_url: DEFAULT_SITE_URL.to_string(),
            route_prefix: DEFAULT_ROUTE_PREFIX.to_string(),
            checksum_param: DEFAULT_CHECKSUM_PARAM.to_string(),
            destination_param: DEFAULT_DESTINATION_PARAM.to_string(),
            descriptive_paths: true,
            environment: EnvironmentType::Production,
            salt_option: DEFAULT_SALT_OPTION.to_string(),
            checksum_length: DEFAULT_CHECKSUM_LENGTH,
        }
    }
}

impl RedirectConfig {
    /// Build a configuration from a parsed config document.
    ///
    /// Reads the `embedRedirects` section (missing ⇒ defaults), applies
    /// environment overrides and validates the result.
    pub fn from_value(cfg: &Value) -> Result<Self, ConfigError> {
        let mut config = match cfg.get(CONFIG_SECTION) {
            Some(section) => serde_json::from_value::<RedirectConfig>(section.clone()).map_err(
                |e| ConfigError::ValidationError {
                    path: CONFIG_SECTION.to_string(),
                    message: e.to_string(),
                },
            )?,
            None => RedirectConfig::default(),
        };
        config.apply_env_overrides()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Apply `EMBED_REDIRECTS_*` environment variables on top of file values.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(site_url) = env::var("EMBED_REDIRECTS_SITE_URL") {
            debug!(target: "config", "site URL overridden from environment");
            self.site_url = site_url;
        }
        if let Ok(environment) = env::var("EMBED_REDIRECTS_ENVIRONMENT") {
            self.environment =
                EnvironmentType::parse(&environment).ok_or_else(|| ConfigError::ValidationError {
                    path: "EMBED_REDIRECTS_ENVIRONMENT".to_string(),
                    message: format!("unknown environment type: {environment}"),
                })?;
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.route_prefix = self.route_prefix.trim_matches('/').to_string();
        self.checksum_length = self
            .checksum_length
            .clamp(MIN_CHECKSUM_LENGTH, MAX_CHECKSUM_LENGTH);
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let site = Url::parse(&self.site_url).map_err(|e| ConfigError::ValidationError {
            path: format!("{CONFIG_SECTION}.siteUrl"),
            message: e.to_string(),
        })?;
        if !matches!(site.scheme(), "http" | "https") || site.host_str().is_none() {
            return Err(ConfigError::ValidationError {
                path: format!("{CONFIG_SECTION}.siteUrl"),
                message: "site URL must be an absolute http(s) URL with a host".to_string(),
            });
        }

        if !ROUTE_PREFIX_REGEX.is_match(&self.route_prefix) {
            return Err(ConfigError::ValidationError {
                path: format!("{CONFIG_SECTION}.routePrefix"),
                message: format!("invalid route prefix: {:?}", self.route_prefix),
            });
        }

        for (field, value) in [
            ("checksumParam", &self.checksum_param),
            ("destinationParam", &self.destination_param),
            ("saltOption", &self.salt_option),
        ] {
            if !PARAM_NAME_REGEX.is_match(value) {
                return Err(ConfigError::ValidationError {
                    path: format!("{CONFIG_SECTION}.{field}"),
                    message: format!("invalid name: {value:?}"),
                });
            }
        }

        if !(MIN_CHECKSUM_LENGTH..=MAX_CHECKSUM_LENGTH).contains(&self.checksum_length) {
            return Err(ConfigError::ValidationError {
                path: format!("{CONFIG_SECTION}.checksumLength"),
                message: format!(
                    "checksum length must be between {MIN_CHECKSUM_LENGTH} and {MAX_CHECKSUM_LENGTH}, got {}",
                    self.checksum_length
                ),
            });
        }

        if self.checksum_param == self.destination_param {
            return Err(ConfigError::ValidationError {
                path: format!("{CONFIG_SECTION}.checksumParam"),
                message: "checksum and destination parameters must differ".to_string(),
            });
        }

        Ok(())
    }

    /// Host component of the site URL, lowercased.
    pub fn site_host(&self) -> Option<String> {
        Url::parse(&self.site_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }

    /// Site root with exactly one trailing slash.
    pub fn site_root(&self) -> String {
        format!("{}/", self.site_url.trim_end_matches('/'))
    }
}

/// Get the config file path.
/// Priority: EMBED_REDIRECTS_CONFIG_PATH > ~/.embed-redirects/config.json5
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = env::var("EMBED_REDIRECTS_CONFIG_PATH") {
        return PathBuf::from(path);
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".embed-redirects")
        .join("config.json5")
}

/// Load the configuration from `path`.
///
/// A missing file yields the defaults (plus environment overrides).
pub fn load_config(path: &Path) -> Result<RedirectConfig, ConfigError> {
    if !path.exists() {
        debug!(target: "config", path = %path.display(), "config file missing, using defaults");
        return RedirectConfig::from_value(&Value::Object(serde_json::Map::new()));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let value = parse_json5(&content, path)?;
    RedirectConfig::from_value(&value)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}
