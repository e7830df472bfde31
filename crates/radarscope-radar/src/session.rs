//! Composition root tying the engine together for one map view.
//!
//! A [`RadarSession`] owns the cache, pipeline, playback controller and the
//! timeline refresh task. UI intents come in as method calls; state goes out
//! as `watch` snapshots.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::animation::{AnimationController, AnimationState};
use crate::cache::TileCache;
use crate::config::EngineConfig;
use crate::error::RadarError;
use crate::pipeline::{TileFetchPipeline, TileHealth};
use crate::provider::{ProviderSelector, TileSource};
use crate::status::{RadarStatus, LOADING_MESSAGE, TILES_UNAVAILABLE_MESSAGE};
use crate::timeline::TimelineFetcher;
use crate::types::{RadarLayer, RadarProvider, RadarTile, Timeline, TileCoord};

/// What the map surface should currently draw as the radar overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayDescriptor {
    pub provider: RadarProvider,
    pub layer: RadarLayer,
    /// Frame baked into the template; `None` for NOAA or before any timeline
    pub frame: Option<i64>,
    pub url_template: String,
    pub attribution: String,
    pub max_zoom: u8,
}

impl OverlayDescriptor {
    fn new(source: &TileSource, layer: RadarLayer, frame: Option<i64>) -> Self {
        let provider = source.provider();
        let frame = frame.filter(|_| provider.supports_history());
        Self {
            provider,
            layer,
            frame,
            url_template: source.url_template(frame),
            attribution: provider.attribution().to_string(),
            max_zoom: provider.max_zoom(),
        }
    }
}

#[derive(Debug, Clone)]
struct StatusInputs {
    provider: RadarProvider,
    last_updated: Option<i64>,
    timeline_error: Option<String>,
    tiles_degraded: bool,
}

impl StatusInputs {
    fn compose(&self) -> RadarStatus {
        let base = RadarStatus::operational(self.provider, self.last_updated);
        if let Some(message) = &self.timeline_error {
            base.degraded(message.clone())
        } else if self.tiles_degraded {
            base.degraded(TILES_UNAVAILABLE_MESSAGE)
        } else if self.last_updated.is_none() {
            base.degraded(LOADING_MESSAGE)
        } else {
            base
        }
    }
}

struct Shared {
    pipeline: TileFetchPipeline,
    animation: AnimationController,
    layers: Mutex<Vec<RadarLayer>>,
    status_inputs: Mutex<StatusInputs>,
    status: watch::Sender<RadarStatus>,
    overlay: watch::Sender<Option<OverlayDescriptor>>,
    timeline: watch::Sender<Timeline>,
}

impl Shared {
    fn apply_timeline(&self, timeline: Timeline) {
        self.pipeline.set_timeline(&timeline);
        self.timeline.send_replace(timeline.clone());
        self.animation.on_timeline_updated(timeline);
        self.publish_overlay();
    }

    fn apply_refresh_outcome(&self, outcome: Result<&Timeline, &RadarError>) {
        self.update_status(|inputs| match outcome {
            Ok(timeline) => {
                inputs.timeline_error = None;
                inputs.last_updated = timeline.latest().map(|f| f.time);
            }
            Err(e) => inputs.timeline_error = Some(e.user_message()),
        });
    }

    fn apply_tile_health(&self, health: TileHealth) {
        self.update_status(|inputs| inputs.tiles_degraded = health.degraded);
    }

    fn update_status<F>(&self, f: F)
    where
        F: FnOnce(&mut StatusInputs),
    {
        let status = {
            let mut inputs = self.status_inputs.lock();
            f(&mut inputs);
            inputs.compose()
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn radar_layer_active(&self) -> bool {
        self.layers.lock().contains(&RadarLayer::Precipitation)
    }

    fn publish_overlay(&self) {
        let descriptor = if self.radar_layer_active() {
            let frame = self.animation.snapshot().current_frame();
            Some(OverlayDescriptor::new(
                &self.pipeline.source(),
                RadarLayer::Precipitation,
                frame,
            ))
        } else {
            None
        };

        self.overlay.send_if_modified(|current| {
            if *current == descriptor {
                return false;
            }
            tracing::debug!("Radar overlay changed: {:?}", descriptor);
            *current = descriptor;
            true
        });
    }
}

/// One live radar view: location, layers, playback and tiles.
pub struct RadarSession {
    shared: Arc<Shared>,
    fetcher: TimelineFetcher,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RadarSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarSession")
            .field("pipeline", &self.shared.pipeline)
            .field("layers", &*self.shared.layers.lock())
            .finish()
    }
}

impl RadarSession {
    /// Build the engine for `(lat, lon)` and start refreshing the timeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: EngineConfig, lat: f64, lon: f64) -> Result<Self, RadarError> {
        let cache = Arc::new(TileCache::new(config.cache_capacity_bytes));
        let selector = ProviderSelector::new(config.endpoints.clone());
        let pipeline = TileFetchPipeline::new(
            Arc::clone(&cache),
            selector,
            &config.tiles,
            &config.user_agent,
            lat,
            lon,
        )?;
        let fetcher = TimelineFetcher::new(&config.timeline, &config.user_agent)?;
        let provider = pipeline.provider();

        let inputs = StatusInputs {
            provider,
            last_updated: None,
            timeline_error: None,
            tiles_degraded: false,
        };
        let (status, _) = watch::channel(inputs.compose());
        let (overlay, _) = watch::channel(None);
        let (timeline, _) = watch::channel(Timeline::empty());

        let shared = Arc::new(Shared {
            pipeline,
            animation: AnimationController::new(),
            layers: Mutex::new(vec![RadarLayer::Precipitation]),
            status_inputs: Mutex::new(inputs),
            status,
            overlay,
            timeline,
        });
        shared.publish_overlay();

        let session = Self {
            shared,
            fetcher,
            cancel: CancellationToken::new(),
        };
        session.spawn_refresh(config.timeline.refresh_interval);
        session.spawn_watchers();

        tracing::info!(
            "Radar session started at ({:.3}, {:.3}) using {}",
            lat,
            lon,
            provider
        );
        Ok(session)
    }

    fn spawn_refresh(&self, interval: std::time::Duration) {
        let on_update = {
            let shared = Arc::clone(&self.shared);
            move |timeline: Timeline| shared.apply_timeline(timeline)
        };
        let on_status = {
            let shared = Arc::clone(&self.shared);
            move |outcome: Result<&Timeline, &RadarError>| shared.apply_refresh_outcome(outcome)
        };

        self.fetcher
            .clone()
            .spawn(interval, self.cancel.child_token(), on_update, on_status);
    }

    fn spawn_watchers(&self) {
        // Frame changes from playback move the overlay template
        let mut animation = self.shared.animation.subscribe();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = animation.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        shared.publish_overlay();
                    }
                }
            }
        });

        let mut health = self.shared.pipeline.subscribe_health();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = health.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = *health.borrow_and_update();
                        shared.apply_tile_health(current);
                    }
                }
            }
        });
    }

    pub fn play(&self) {
        self.shared.animation.play();
    }

    pub fn pause(&self) {
        self.shared.animation.pause();
    }

    pub fn toggle_playback(&self) {
        self.shared.animation.toggle_playback();
    }

    pub fn seek(&self, progress: f64) {
        self.shared.animation.seek(progress);
        self.shared.publish_overlay();
    }

    pub fn set_speed(&self, multiplier: f64) {
        self.shared.animation.set_speed(multiplier);
    }

    /// Make `layer` the only active layer.
    pub fn select_layer(&self, layer: RadarLayer) {
        {
            let mut layers = self.shared.layers.lock();
            if layers.as_slice() == [layer] {
                return;
            }
            layers.clear();
            layers.push(layer);
        }
        self.on_layers_changed();
    }

    /// Add or remove `layer` from the active set.
    pub fn toggle_layer(&self, layer: RadarLayer) {
        {
            let mut layers = self.shared.layers.lock();
            if let Some(pos) = layers.iter().position(|l| *l == layer) {
                layers.remove(pos);
            } else {
                layers.push(layer);
            }
        }
        self.on_layers_changed();
    }

    fn on_layers_changed(&self) {
        self.shared.pipeline.restart_context();
        self.shared.publish_overlay();
    }

    pub fn active_layers(&self) -> Vec<RadarLayer> {
        self.shared.layers.lock().clone()
    }

    /// Move the view. Re-selects the provider and drops in-flight fetches.
    pub fn set_location(&self, lat: f64, lon: f64) {
        let previous = self.shared.pipeline.provider();
        let provider = self.shared.pipeline.set_location(lat, lon);
        if provider != previous {
            tracing::info!("Radar provider switched to {}", provider);
        }
        self.shared.update_status(|inputs| inputs.provider = provider);
        self.shared.publish_overlay();
    }

    pub fn provider(&self) -> RadarProvider {
        self.shared.pipeline.provider()
    }

    /// Fetch one tile of the current overlay at the current frame.
    pub async fn fetch_tile(&self, zoom: u8, x: u32, y: u32) -> Result<Arc<RadarTile>, RadarError> {
        let (layer, frame) = self.current_request()?;
        self.shared.pipeline.fetch_tile(layer, zoom, x, y, frame).await
    }

    /// Fetch a grid of tiles of the current overlay at the current frame.
    pub async fn fetch_tiles(
        &self,
        coords: &[TileCoord],
    ) -> Result<Vec<(TileCoord, Result<Arc<RadarTile>, RadarError>)>, RadarError> {
        let (layer, frame) = self.current_request()?;
        Ok(self.shared.pipeline.fetch_tiles(layer, coords, frame).await)
    }

    fn current_request(&self) -> Result<(RadarLayer, Option<i64>), RadarError> {
        if !self.shared.radar_layer_active() {
            let active = self
                .active_layers()
                .iter()
                .map(|l| l.title())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(RadarError::LayerUnavailable(if active.is_empty() {
                "no active layer".to_string()
            } else {
                active
            }));
        }

        let state = self.shared.animation.snapshot();
        let frame = if state.is_live() {
            None
        } else {
            state.current_frame()
        };
        Ok((RadarLayer::Precipitation, frame))
    }

    /// Fetch the timeline once outside the refresh loop.
    ///
    /// On failure the current timeline and playback state are kept.
    pub async fn refresh_timeline(&self) -> Result<Timeline, RadarError> {
        let result = self.fetcher.fetch().await;
        self.shared.apply_refresh_outcome(result.as_ref());
        let timeline = result?;
        if *self.shared.timeline.borrow() != timeline {
            self.shared.apply_timeline(timeline.clone());
        }
        Ok(timeline)
    }

    pub fn timeline(&self) -> Timeline {
        self.shared.timeline.borrow().clone()
    }

    pub fn animation(&self) -> watch::Receiver<AnimationState> {
        self.shared.animation.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<RadarStatus> {
        self.shared.status.subscribe()
    }

    pub fn overlay(&self) -> watch::Receiver<Option<OverlayDescriptor>> {
        self.shared.overlay.subscribe()
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        self.shared.pipeline.cache()
    }

    /// Stop refreshing, stop playback and cancel in-flight fetches.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.shared.animation.shutdown();
        self.shared.pipeline.shutdown();
        tracing::debug!("Radar session shut down");
    }
}

impl Drop for RadarSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
