//! Radar engine error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RadarError {
    #[error("Radar timeline unavailable from all endpoints")]
    TimelineUnavailable,

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Empty response body from {0}")]
    EmptyBody(String),

    #[error("Failed to decode tile image: {0}")]
    Decode(String),

    #[error("Failed to parse timeline: {0}")]
    Parse(String),

    #[error("Zoom {zoom} exceeds provider maximum {max}")]
    ZoomOutOfRange { zoom: u8, max: u8 },

    #[error("Layer {0} has no radar imagery")]
    LayerUnavailable(String),

    #[error("Response for generation {requested} discarded (current generation {current})")]
    StaleResponse { requested: u64, current: u64 },

    #[error("Tile of {size} bytes exceeds cache capacity of {capacity} bytes")]
    CacheRejected { size: usize, capacity: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl RadarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::TimelineUnavailable => "Radar temporarily unavailable".to_string(),
            Self::Http { status, .. } if *status >= 500 => {
                "Radar server is having trouble. Retrying shortly.".to_string()
            }
            Self::Http { .. } | Self::EmptyBody(_) | Self::Decode(_) | Self::Parse(_) => {
                "Radar data could not be loaded".to_string()
            }
            Self::ZoomOutOfRange { max, .. } => format!("Radar is available up to zoom {}", max),
            Self::LayerUnavailable(layer) => format!("No radar imagery for {}", layer),
            Self::StaleResponse { .. } | Self::Cancelled => String::new(),
            Self::CacheRejected { .. } => "Radar tile too large to display".to_string(),
            Self::Network(_) => "Network error. Check your connection.".to_string(),
        }
    }

    /// Whether this error means "no tile this cycle" for a single tile.
    pub fn is_tile_failure(&self) -> bool {
        !matches!(
            self,
            Self::TimelineUnavailable | Self::StaleResponse { .. } | Self::Cancelled
        )
    }

    /// Whether the same request may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Network(_) | Self::EmptyBody(_) | Self::TimelineUnavailable => true,
            _ => false,
        }
    }

    /// Whether the error should be dropped silently.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::StaleResponse { .. } | Self::Cancelled)
    }
}
