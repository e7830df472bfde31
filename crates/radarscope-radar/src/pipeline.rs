//! Cache-or-fetch pipeline for radar tiles.
//!
//! Each request resolves a [`TileKey`], returns a cached tile on hit, and on
//! miss downloads, decodes and stores the image. Downloads are bounded by a
//! semaphore; decoding runs on the blocking pool.
//!
//! Requests belong to a fetch context. Changing location or layer starts a
//! new context: the previous context's token is cancelled and anything that
//! still completes for it is dropped as [`RadarError::StaleResponse`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::cache::TileCache;
use crate::config::TileConfig;
use crate::error::RadarError;
use crate::provider::{ProviderSelector, TileSource};
use crate::types::{FrameRef, RadarLayer, RadarProvider, RadarTile, Timeline, TileCoord, TileKey};

/// Health of the tile path, as seen by the status line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileHealth {
    pub consecutive_failures: u32,
    /// Failures reached the configured threshold
    pub degraded: bool,
}

struct FetchContext {
    generation: u64,
    token: CancellationToken,
    source: TileSource,
}

struct PipelineInner {
    cache: Arc<TileCache>,
    selector: ProviderSelector,
    client: reqwest::Client,
    permits: Semaphore,
    generation: AtomicU64,
    context: Mutex<FetchContext>,
    shutdown: CancellationToken,
    latest_frame: Mutex<Option<i64>>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    live_key_ttl: Duration,
    health: watch::Sender<TileHealth>,
}

/// Shared handle to the tile pipeline. Cloning is cheap.
#[derive(Clone)]
pub struct TileFetchPipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for TileFetchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileFetchPipeline")
            .field("generation", &self.generation())
            .field("provider", &self.provider())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

impl TileFetchPipeline {
    /// Build a pipeline with an initial context for `(lat, lon)`.
    pub fn new(
        cache: Arc<TileCache>,
        selector: ProviderSelector,
        config: &TileConfig,
        user_agent: &str,
        lat: f64,
        lon: f64,
    ) -> Result<Self, RadarError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(user_agent)
            .build()?;

        let shutdown = CancellationToken::new();
        let source = selector.select(lat, lon);
        let (health, _) = watch::channel(TileHealth::default());

        Ok(Self {
            inner: Arc::new(PipelineInner {
                cache,
                selector,
                client,
                permits: Semaphore::new(config.max_concurrent_fetches.max(1)),
                generation: AtomicU64::new(0),
                context: Mutex::new(FetchContext {
                    generation: 0,
                    token: shutdown.child_token(),
                    source,
                }),
                shutdown,
                latest_frame: Mutex::new(None),
                consecutive_failures: AtomicU32::new(0),
                failure_threshold: config.failure_threshold.max(1),
                live_key_ttl: config.live_key_ttl,
                health,
            }),
        })
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.inner.cache
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn provider(&self) -> RadarProvider {
        self.inner.context.lock().source.provider()
    }

    pub fn source(&self) -> TileSource {
        self.inner.context.lock().source.clone()
    }

    pub fn subscribe_health(&self) -> watch::Receiver<TileHealth> {
        self.inner.health.subscribe()
    }

    /// Re-resolve the provider for a new location and start a new context.
    pub fn set_location(&self, lat: f64, lon: f64) -> RadarProvider {
        let source = self.inner.selector.select(lat, lon);
        let provider = source.provider();
        self.begin_context(Some(source));
        provider
    }

    /// Start a new context with the same provider (e.g. after a layer change).
    pub fn restart_context(&self) -> u64 {
        self.begin_context(None)
    }

    fn begin_context(&self, source: Option<TileSource>) -> u64 {
        let mut context = self.inner.context.lock();
        context.token.cancel();

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        context.generation = generation;
        context.token = self.inner.shutdown.child_token();
        if let Some(source) = source {
            context.source = source;
        }

        tracing::debug!(
            "Started tile fetch context {} for {}",
            generation,
            context.source.provider().as_str()
        );
        generation
    }

    /// Record the newest frame so "live" requests resolve to a concrete key.
    pub fn set_timeline(&self, timeline: &Timeline) {
        *self.inner.latest_frame.lock() = timeline.latest().map(|f| f.time);
    }

    pub fn latest_frame(&self) -> Option<i64> {
        *self.inner.latest_frame.lock()
    }

    /// Cache key for a request against `provider`.
    ///
    /// Providers without a historical parameter always get a live key, so a
    /// NOAA tile never poses as a specific frame.
    pub fn resolve_key(
        &self,
        layer: RadarLayer,
        provider: RadarProvider,
        coord: TileCoord,
        timestamp: Option<i64>,
    ) -> TileKey {
        let concrete = if provider.supports_history() {
            timestamp.or_else(|| self.latest_frame())
        } else {
            None
        };

        let frame = match concrete {
            Some(ts) => FrameRef::At(ts),
            None => FrameRef::live_at(
                chrono::Utc::now().timestamp(),
                self.inner.live_key_ttl.as_secs() as i64,
            ),
        };

        TileKey::new(
            format!("{}/{}", layer.layer_id(), provider.as_str()),
            coord.zoom,
            coord.x,
            coord.y,
            frame,
        )
    }

    /// Fetch one tile through the cache.
    ///
    /// `timestamp = None` means the newest frame. Every failure is a typed
    /// error; callers treat it as "no tile this cycle".
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_tile(
        &self,
        layer: RadarLayer,
        zoom: u8,
        x: u32,
        y: u32,
        timestamp: Option<i64>,
    ) -> Result<Arc<RadarTile>, RadarError> {
        if !layer.has_radar_imagery() {
            return Err(RadarError::LayerUnavailable(layer.title().to_string()));
        }

        let (generation, token, source) = {
            let context = self.inner.context.lock();
            (context.generation, context.token.clone(), context.source.clone())
        };

        let coord = TileCoord::new(zoom, x, y);
        let key = self.resolve_key(layer, source.provider(), coord, timestamp);
        if let Some(tile) = self.inner.cache.get(&key) {
            return Ok(tile);
        }

        let url = source.tile_url(coord, key.frame.timestamp())?;

        let result = tokio::select! {
            _ = token.cancelled() => Err(RadarError::Cancelled),
            result = self.download_and_decode(&url) => result,
        };

        let tile = match result {
            Ok(tile) => Arc::new(tile),
            Err(e) => {
                if counts_toward_outage(&e) {
                    self.record_failure(&url, &e);
                }
                return Err(e);
            }
        };

        self.record_success();
        self.store_if_current(generation, &token, key, &tile)?;
        Ok(tile)
    }

    /// Insert `tile` unless its context has been replaced.
    ///
    /// Runs under the context lock so a concurrent `begin_context` cannot
    /// land between the check and the insert.
    fn store_if_current(
        &self,
        generation: u64,
        token: &CancellationToken,
        key: TileKey,
        tile: &Arc<RadarTile>,
    ) -> Result<(), RadarError> {
        let context = self.inner.context.lock();
        if context.generation != generation || token.is_cancelled() {
            tracing::debug!("Discarding tile {} from generation {}", key, generation);
            return Err(RadarError::StaleResponse {
                requested: generation,
                current: context.generation,
            });
        }
        self.inner.cache.insert(key, Arc::clone(tile))
    }

    /// Fetch a set of tiles concurrently. Results keep the order of `coords`.
    pub async fn fetch_tiles(
        &self,
        layer: RadarLayer,
        coords: &[TileCoord],
        timestamp: Option<i64>,
    ) -> Vec<(TileCoord, Result<Arc<RadarTile>, RadarError>)> {
        let mut tasks = JoinSet::new();
        for (index, coord) in coords.iter().copied().enumerate() {
            let pipeline = self.clone();
            tasks.spawn(async move {
                let result = pipeline
                    .fetch_tile(layer, coord.zoom, coord.x, coord.y, timestamp)
                    .await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<Arc<RadarTile>, RadarError>>> =
            coords.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::warn!("Tile fetch task failed: {}", e),
            }
        }

        coords
            .iter()
            .copied()
            .zip(results)
            .map(|(coord, result)| (coord, result.unwrap_or(Err(RadarError::Cancelled))))
            .collect()
    }

    /// Cancel every in-flight and future fetch.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.permits.close();
    }

    async fn download_and_decode(&self, url: &str) -> Result<RadarTile, RadarError> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| RadarError::Cancelled)?;

        let body = self.download(url).await?;
        tokio::task::spawn_blocking(move || decode_tile(body))
            .await
            .map_err(|e| RadarError::Decode(e.to_string()))?
    }

    async fn download(&self, url: &str) -> Result<Bytes, RadarError> {
        let response = self.inner.client.get(url).send().await?;
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
        Ok(body)
    }

    fn record_failure(&self, url: &str, error: &RadarError) {
        let failures = self.inner.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!("Tile fetch failed ({} in a row) for {}: {}", failures, url, error);

        let degraded = failures >= self.inner.failure_threshold;
        self.inner.health.send_if_modified(|health| {
            health.consecutive_failures = failures;
            if health.degraded != degraded {
                health.degraded = degraded;
                if degraded {
                    tracing::warn!("Radar tiles unavailable after {} consecutive failures", failures);
                }
                return true;
            }
            false
        });
    }

    fn record_success(&self) {
        if self.inner.consecutive_failures.swap(0, Ordering::SeqCst) == 0 {
            return;
        }
        self.inner.health.send_if_modified(|health| {
            let was_degraded = health.degraded;
            *health = TileHealth::default();
            if was_degraded {
                tracing::info!("Radar tiles recovered");
            }
            was_degraded
        });
    }
}

/// Decode an encoded tile into RGBA pixels.
pub fn decode_tile(encoded: Bytes) -> Result<RadarTile, RadarError> {
    let image = image::load_from_memory(&encoded)
        .map_err(|e| RadarError::Decode(e.to_string()))?
        .to_rgba8();
    Ok(RadarTile::new(encoded, image))
}

/// Failures that suggest the provider itself is struggling
fn counts_toward_outage(error: &RadarError) -> bool {
    matches!(
        error,
        RadarError::Http { .. }
            | RadarError::EmptyBody(_)
            | RadarError::Decode(_)
            | RadarError::Network(_)
    )
}
