//! Discovery and periodic refresh of available radar frames.

use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::TimelineConfig;
use crate::error::RadarError;
use crate::types::Timeline;

/// Sections of the weather-maps document that carry radar frames
const FRAME_SECTIONS: [&str; 2] = ["past", "nowcast"];

/// Fetches the frame list from a primary endpoint with a fallback.
#[derive(Debug, Clone)]
pub struct TimelineFetcher {
    client: reqwest::Client,
    primary_url: String,
    fallback_url: String,
}

impl TimelineFetcher {
    pub fn new(config: &TimelineConfig, user_agent: &str) -> Result<Self, RadarError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(user_agent)
            .build()?;

        Ok(Self {
            client,
            primary_url: config.primary_url.clone(),
            fallback_url: config.fallback_url.clone(),
        })
    }

    /// Fetch the current timeline.
    ///
    /// The fallback endpoint is tried when the primary fails or yields no
    /// frames. Returns `TimelineUnavailable` only when both come up empty.
    #[instrument(skip(self), level = "info")]
    pub async fn fetch(&self) -> Result<Timeline, RadarError> {
        for url in [&self.primary_url, &self.fallback_url] {
            match self.fetch_from(url).await {
                Ok(timeline) if !timeline.is_empty() => {
                    tracing::debug!("Loaded {} radar frames from {}", timeline.len(), url);
                    return Ok(timeline);
                }
                Ok(_) => tracing::warn!("Timeline endpoint {} returned no frames", url),
                Err(e) => tracing::warn!("Timeline endpoint {} failed: {}", url, e),
            }
        }

        Err(RadarError::TimelineUnavailable)
    }

    async fn fetch_from(&self, url: &str) -> Result<Timeline, RadarError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RadarError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(RadarError::EmptyBody(url.to_string()));
        }

        parse_timeline(&body)
    }

    /// Refresh loop: fetch now, then every `interval` until cancelled.
    ///
    /// `on_update` only sees timelines that differ from the last one
    /// delivered. `on_status` sees every cycle's outcome. A failed cycle
    /// never delivers an empty timeline, so consumers keep their frames.
    pub async fn run<U, S>(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        mut on_update: U,
        mut on_status: S,
    ) where
        U: FnMut(Timeline),
        S: FnMut(Result<&Timeline, &RadarError>),
    {
        let mut last_published: Option<Timeline> = None;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.fetch() => result,
            };

            match result {
                Ok(timeline) => {
                    on_status(Ok(&timeline));
                    if last_published.as_ref() != Some(&timeline) {
                        tracing::info!(
                            "Radar timeline updated: {} frames, latest {:?}",
                            timeline.len(),
                            timeline.latest().map(|f| f.time)
                        );
                        last_published = Some(timeline.clone());
                        on_update(timeline);
                    }
                }
                Err(e) => {
                    tracing::warn!("Radar timeline refresh failed: {}", e);
                    on_status(Err(&e));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::debug!("Radar timeline refresh loop stopped");
    }

    /// Spawn [`TimelineFetcher::run`] on the current runtime.
    pub fn spawn<U, S>(
        self,
        interval: Duration,
        cancel: CancellationToken,
        on_update: U,
        on_status: S,
    ) -> JoinHandle<()>
    where
        U: FnMut(Timeline) + Send + 'static,
        S: FnMut(Result<&Timeline, &RadarError>) + Send + 'static,
    {
        tokio::spawn(async move { self.run(interval, cancel, on_update, on_status).await })
    }
}

/// Parse either a flat `[int, ...]` array or the
/// `{"radar": {"past": [{"time": ..}], "nowcast": [..]}}` document.
///
/// Entries that are not integers are skipped; the result is sorted and
/// deduplicated.
pub fn parse_timeline(body: &[u8]) -> Result<Timeline, RadarError> {
    let document: Value =
        serde_json::from_slice(body).map_err(|e| RadarError::Parse(e.to_string()))?;

    match document {
        Value::Array(items) => Ok(Timeline::from_timestamps(items.iter().filter_map(frame_time))),
        Value::Object(map) => {
            let radar = map
                .get("radar")
                .ok_or_else(|| RadarError::Parse("missing \"radar\" section".to_string()))?;

            let times = FRAME_SECTIONS
                .iter()
                .filter_map(|section| radar.get(section).and_then(Value::as_array))
                .flatten()
                .filter_map(frame_time);

            Ok(Timeline::from_timestamps(times))
        }
        other => Err(RadarError::Parse(format!(
            "unexpected timeline document: {}",
            json_kind(&other)
        ))),
    }
}

/// A frame is either a bare integer or an object with an integer `time`.
fn frame_time(entry: &Value) -> Option<i64> {
    match entry {
        Value::Number(n) => n.as_i64(),
        Value::Object(_) => entry.get("time").and_then(Value::as_i64),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
