//! Radar tile and timeline engine.
//!
//! Selects a radar provider by location, keeps the list of available frames
//! fresh, animates across them, and serves decoded tiles through a
//! byte-bounded cache.

pub mod animation;
pub mod cache;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod provider;
pub mod session;
pub mod status;
pub mod timeline;
pub mod types;

pub use animation::{AnimationController, AnimationState};
pub use cache::{CacheStats, TileCache};
pub use config::{EngineConfig, TileConfig, TimelineConfig};
pub use error::RadarError;
pub use pipeline::{TileFetchPipeline, TileHealth};
pub use provider::{select_provider, ProviderEndpoints, ProviderSelector, TileSource};
pub use session::{OverlayDescriptor, RadarSession};
pub use status::{format_preview_status, format_preview_timestamp, RadarStatus};
pub use timeline::TimelineFetcher;
pub use types::*;
