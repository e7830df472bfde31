//! Diagnostic radar status and its preview labels.

use serde::{Deserialize, Serialize};

use crate::types::RadarProvider;

pub const LOADING_MESSAGE: &str = "Loading radar";
pub const TILES_UNAVAILABLE_MESSAGE: &str = "Radar tiles unavailable";

/// Snapshot of the engine's health as shown next to the radar preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadarStatus {
    pub provider: RadarProvider,
    /// Unix seconds of the newest frame, if any timeline was ever loaded
    pub last_updated_epoch_seconds: Option<i64>,
    pub is_operational: bool,
    pub message: Option<String>,
}

impl Default for RadarStatus {
    fn default() -> Self {
        Self {
            provider: RadarProvider::RainViewer,
            last_updated_epoch_seconds: None,
            is_operational: false,
            message: Some(LOADING_MESSAGE.to_string()),
        }
    }
}

impl RadarStatus {
    pub fn operational(provider: RadarProvider, last_updated: Option<i64>) -> Self {
        Self {
            provider,
            last_updated_epoch_seconds: last_updated,
            is_operational: true,
            message: None,
        }
    }

    /// Mark as degraded, keeping the last known update time.
    pub fn degraded(&self, message: impl Into<String>) -> Self {
        Self {
            provider: self.provider,
            last_updated_epoch_seconds: self.last_updated_epoch_seconds,
            is_operational: false,
            message: Some(message.into()),
        }
    }
}

/// Relative age label for the preview card.
pub fn format_preview_timestamp(epoch_seconds: Option<i64>, now_secs: i64) -> String {
    let Some(epoch) = epoch_seconds.filter(|ts| *ts > 0) else {
        return "Awaiting data".to_string();
    };

    let minutes_ago = ((now_secs - epoch) / 60).max(0);
    match minutes_ago {
        0 => "Live now".to_string(),
        m if m < 60 => format!("{}m ago", m),
        m if m < 1440 => format!("{}h ago", m / 60),
        m => format!("{}d ago", m / 1440),
    }
}

/// One-line status: a failure message replaces the age label entirely.
pub fn format_preview_status(status: &RadarStatus, now_secs: i64) -> String {
    let time_label = format_preview_timestamp(status.last_updated_epoch_seconds, now_secs);
    let message = status.message.as_deref().map(str::trim).unwrap_or("");

    if !status.is_operational && !message.is_empty() {
        message.to_string()
    } else if message.is_empty() {
        time_label
    } else {
        format!("{} • {}", time_label, message)
    }
}
