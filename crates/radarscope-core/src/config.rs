use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

use radarscope_radar::config::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_CONCURRENT_FETCHES, DEFAULT_REFRESH_INTERVAL_SECS,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TIMELINE_FALLBACK_URL, DEFAULT_TIMELINE_PRIMARY_URL,
    DEFAULT_USER_AGENT,
};
use radarscope_radar::provider::{NOAA_SERVERS, RAINVIEWER_SERVERS};
use radarscope_radar::{EngineConfig, ProviderEndpoints, TileConfig, TimelineConfig};

const APP_DIR: &str = "radarscope";
const MAX_CACHE_CAPACITY_MB: u64 = 1024;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// All errors joined into one line
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine tuning
    #[serde(default)]
    pub radar: RadarConfig,

    /// Upstream URLs
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Location used when none is given on the command line
    #[serde(default)]
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    /// Tile cache budget in MiB
    pub cache_capacity_mb: u64,
    /// Timeline refresh interval in seconds
    pub refresh_seconds: u64,
    pub tile_timeout_seconds: u64,
    pub timeline_timeout_seconds: u64,
    pub max_concurrent_fetches: usize,
    /// Consecutive tile failures before the status reports an outage
    pub failure_threshold: u32,
    /// How long a "live" tile stays cached when no frame is known
    pub live_key_ttl_seconds: u64,
    pub user_agent: String,
}

impl Default for RadarConfig {
    fn default() -> Self {
        Self {
            cache_capacity_mb: 50,
            refresh_seconds: DEFAULT_REFRESH_INTERVAL_SECS,
            tile_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            timeline_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            live_key_ttl_seconds: DEFAULT_REFRESH_INTERVAL_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub timeline_primary_url: String,
    pub timeline_fallback_url: String,
    pub noaa_servers: Vec<String>,
    pub rainviewer_servers: Vec<String>,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            timeline_primary_url: DEFAULT_TIMELINE_PRIMARY_URL.to_string(),
            timeline_fallback_url: DEFAULT_TIMELINE_FALLBACK_URL.to_string(),
            noaa_servers: NOAA_SERVERS.iter().map(|s| s.to_string()).collect(),
            rainviewer_servers: RAINVIEWER_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        // Kansas City, roughly the middle of the NEXRAD mosaic
        Self {
            latitude: 39.0997,
            longitude: -94.5786,
        }
    }
}

impl Config {
    /// Load configuration from the user config dir, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Created default config at {}", path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Warnings are logged; any error fails the load.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()).into());
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let radar = &self.radar;

        if radar.cache_capacity_mb == 0 {
            result.add_error("radar.cache_capacity_mb", "Cache capacity must be greater than 0");
        } else if radar.cache_capacity_mb > MAX_CACHE_CAPACITY_MB {
            result.add_warning(
                "radar.cache_capacity_mb",
                format!("Cache capacity is unusually large (>{} MiB)", MAX_CACHE_CAPACITY_MB),
            );
        }

        if radar.refresh_seconds == 0 {
            result.add_error("radar.refresh_seconds", "Refresh interval must be greater than 0");
        } else if radar.refresh_seconds < 30 {
            result.add_warning(
                "radar.refresh_seconds",
                "Refreshing more often than every 30 seconds may get rate limited",
            );
        }

        for (field, value) in [
            ("radar.tile_timeout_seconds", radar.tile_timeout_seconds),
            ("radar.timeline_timeout_seconds", radar.timeline_timeout_seconds),
            ("radar.live_key_ttl_seconds", radar.live_key_ttl_seconds),
        ] {
            if value == 0 {
                result.add_error(field, "Must be greater than 0");
            }
        }

        if radar.max_concurrent_fetches == 0 {
            result.add_error(
                "radar.max_concurrent_fetches",
                "At least one concurrent fetch is required",
            );
        }

        if radar.failure_threshold == 0 {
            result.add_error("radar.failure_threshold", "Failure threshold must be greater than 0");
        }

        if radar.user_agent.trim().is_empty() {
            result.add_warning("radar.user_agent", "Empty user agent; some servers reject it");
        }

        self.validate_url(
            &self.endpoints.timeline_primary_url,
            "endpoints.timeline_primary_url",
            &mut result,
        );
        self.validate_url(
            &self.endpoints.timeline_fallback_url,
            "endpoints.timeline_fallback_url",
            &mut result,
        );
        self.validate_servers(&self.endpoints.noaa_servers, "endpoints.noaa_servers", &mut result);
        self.validate_servers(
            &self.endpoints.rainviewer_servers,
            "endpoints.rainviewer_servers",
            &mut result,
        );

        let location = &self.location;
        if !(-90.0..=90.0).contains(&location.latitude) {
            result.add_error("location.latitude", "Latitude must be between -90 and 90");
        }
        if !(-180.0..=180.0).contains(&location.longitude) {
            result.add_error("location.longitude", "Longitude must be between -180 and 180");
        }

        result
    }

    fn validate_servers(&self, servers: &[String], field_name: &str, result: &mut ValidationResult) {
        if servers.is_empty() {
            result.add_warning(field_name, "No servers configured; built-in defaults will be used");
            return;
        }
        for (i, server) in servers.iter().enumerate() {
            self.validate_url(server, &format!("{}[{}]", field_name, i), result);
        }
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Engine settings derived from this config
    pub fn radar_engine(&self) -> EngineConfig {
        let radar = &self.radar;
        EngineConfig {
            cache_capacity_bytes: (radar.cache_capacity_mb as usize).saturating_mul(1024 * 1024),
            user_agent: radar.user_agent.clone(),
            timeline: TimelineConfig {
                primary_url: self.endpoints.timeline_primary_url.clone(),
                fallback_url: self.endpoints.timeline_fallback_url.clone(),
                timeout: Duration::from_secs(radar.timeline_timeout_seconds),
                refresh_interval: Duration::from_secs(radar.refresh_seconds),
            },
            tiles: TileConfig {
                timeout: Duration::from_secs(radar.tile_timeout_seconds),
                max_concurrent_fetches: radar.max_concurrent_fetches,
                failure_threshold: radar.failure_threshold,
                live_key_ttl: Duration::from_secs(radar.live_key_ttl_seconds),
            },
            endpoints: ProviderEndpoints {
                noaa_servers: self.endpoints.noaa_servers.clone(),
                rainviewer_servers: self.endpoints.rainviewer_servers.clone(),
            },
        }
    }

    /// Save configuration to the user config dir
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join(APP_DIR);

        Ok(config_dir.join("config.toml"))
    }
}
