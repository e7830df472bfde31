//! Runtime settings for the radar engine.
//!
//! These are plain values; loading them from disk is the application's job.

use std::time::Duration;

use crate::cache::DEFAULT_CAPACITY_BYTES;
use crate::provider::ProviderEndpoints;

pub const DEFAULT_TIMELINE_PRIMARY_URL: &str = "https://api.rainviewer.com/public/weather-maps.json";
pub const DEFAULT_TIMELINE_FALLBACK_URL: &str = "https://tilecache.rainviewer.com/api/maps.json";

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 120;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 6;
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 8;
pub const DEFAULT_USER_AGENT: &str = concat!("radarscope/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct TimelineConfig {
    pub primary_url: String,
    pub fallback_url: String,
    pub timeout: Duration,
    pub refresh_interval: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_TIMELINE_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_TIMELINE_FALLBACK_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TileConfig {
    pub timeout: Duration,
    pub max_concurrent_fetches: usize,
    /// Consecutive failures before the status reports tiles as unavailable
    pub failure_threshold: u32,
    /// Lifetime of a "live" cache key when no concrete frame is known
    pub live_key_ttl: Duration,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            live_key_ttl: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
        }
    }
}

/// Everything a [`crate::RadarSession`] needs to start.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_capacity_bytes: usize,
    pub user_agent: String,
    pub timeline: TimelineConfig,
    pub tiles: TileConfig,
    pub endpoints: ProviderEndpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity_bytes: DEFAULT_CAPACITY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeline: TimelineConfig::default(),
            tiles: TileConfig::default(),
            endpoints: ProviderEndpoints::default(),
        }
    }
}
