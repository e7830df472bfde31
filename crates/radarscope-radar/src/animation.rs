//! Playback state machine for the radar frame timeline.
//!
//! State lives inside a `watch` channel so every mutation is published to
//! subscribers in one step. The ticker is a separate task that advances one
//! frame per cadence while playing.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::Timeline;

/// Progress at or above this counts as "live"
pub const LIVE_THRESHOLD: f64 = 0.99;
/// Frame cadence at 1x speed
pub const BASE_FRAME_DELAY: Duration = Duration::from_millis(500);
/// Fastest allowed cadence regardless of speed
pub const MIN_FRAME_DELAY: Duration = Duration::from_millis(100);
/// Slowest allowed cadence regardless of speed
pub const MAX_FRAME_DELAY: Duration = Duration::from_secs(5);
/// Accepted playback multipliers; finite values outside are clamped
pub const MIN_PLAYBACK_SPEED: f64 = 0.1;
pub const MAX_PLAYBACK_SPEED: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationState {
    pub is_playing: bool,
    /// Scrub position in `[0, 1]`; `1.0` is live
    pub progress: f64,
    /// `None` while no frames are loaded
    pub current_frame_index: Option<usize>,
    pub playback_speed: f64,
    pub available_frames: Timeline,
    pub is_loading: bool,
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            is_playing: false,
            progress: 1.0,
            current_frame_index: None,
            playback_speed: 1.0,
            available_frames: Timeline::empty(),
            is_loading: true,
        }
    }
}

impl AnimationState {
    /// Current index, re-clamped into the frame range.
    pub fn clamped_index(&self) -> Option<usize> {
        let last = self.available_frames.last_index()?;
        Some(self.current_frame_index.unwrap_or(last).min(last))
    }

    /// Timestamp of the frame currently shown
    pub fn current_frame(&self) -> Option<i64> {
        self.clamped_index()
            .and_then(|i| self.available_frames.get(i))
            .map(|f| f.time)
    }

    pub fn is_live(&self) -> bool {
        match (self.clamped_index(), self.available_frames.last_index()) {
            (Some(index), Some(last)) => index == last || self.progress >= LIVE_THRESHOLD,
            _ => true,
        }
    }

    /// `"LIVE"`, `"-23m"` or `"-1h 5m"` relative to the newest frame.
    pub fn time_label(&self) -> String {
        if self.is_live() {
            return "LIVE".to_string();
        }

        let (Some(current), Some(latest)) = (self.current_frame(), self.available_frames.latest())
        else {
            return "LIVE".to_string();
        };

        let minutes = (((latest.time - current) as f64) / 60.0).round().max(1.0) as i64;
        if minutes < 60 {
            format!("-{}m", minutes)
        } else {
            format!("-{}h {}m", minutes / 60, minutes % 60)
        }
    }

    /// Delay before the next tick at the current speed, within
    /// `[MIN_FRAME_DELAY, MAX_FRAME_DELAY]` for any multiplier.
    pub fn frame_delay(&self) -> Duration {
        Duration::try_from_secs_f64(BASE_FRAME_DELAY.as_secs_f64() / self.playback_speed)
            .unwrap_or(MAX_FRAME_DELAY)
            .clamp(MIN_FRAME_DELAY, MAX_FRAME_DELAY)
    }

    fn apply_timeline(&mut self, frames: Timeline) {
        let Some(last) = frames.last_index() else {
            self.available_frames = frames;
            self.current_frame_index = None;
            self.is_loading = true;
            return;
        };

        let uninitialized = self.current_frame_index.is_none() || self.available_frames.is_empty();
        if uninitialized || self.progress >= LIVE_THRESHOLD || last == 0 {
            self.current_frame_index = Some(last);
            self.progress = 1.0;
        } else {
            self.current_frame_index = Some(index_for_progress(self.progress, last));
        }

        self.available_frames = frames;
        self.is_loading = false;
    }

    fn seek(&mut self, progress: f64) {
        self.is_playing = false;
        let progress = if progress.is_nan() { self.progress } else { progress };
        self.progress = progress.clamp(0.0, 1.0);
        if let Some(last) = self.available_frames.last_index() {
            self.current_frame_index = Some(index_for_progress(self.progress, last));
        }
    }

    fn advance(&mut self) {
        let Some(last) = self.available_frames.last_index() else {
            return;
        };
        if last == 0 {
            self.current_frame_index = Some(0);
            return;
        }

        let next = match self.clamped_index() {
            Some(index) if index < last => index + 1,
            _ => 0,
        };
        self.current_frame_index = Some(next);
        self.progress = next as f64 / last as f64;
    }
}

fn index_for_progress(progress: f64, last: usize) -> usize {
    ((progress * last as f64).round() as usize).min(last)
}

struct Inner {
    state: watch::Sender<AnimationState>,
    ticker: Mutex<Option<CancellationToken>>,
}

impl Inner {
    fn frame_delay(&self) -> Duration {
        self.state.borrow().frame_delay()
    }

    /// Cancel the ticker and apply `f`, both under the ticker lock so a
    /// concurrent `play()` cannot interleave.
    fn stop_ticker_and<F>(&self, f: F)
    where
        F: FnOnce(&mut AnimationState) -> bool,
    {
        let mut ticker = self.ticker.lock();
        if let Some(token) = ticker.take() {
            token.cancel();
        }
        self.state.send_if_modified(f);
    }
}

/// Drives [`AnimationState`] in response to playback intents.
#[derive(Clone)]
pub struct AnimationController {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AnimationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationController")
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl Default for AnimationController {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(AnimationState::default());
        Self {
            inner: Arc::new(Inner {
                state,
                ticker: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AnimationState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> AnimationState {
        self.inner.state.borrow().clone()
    }

    pub fn is_live(&self) -> bool {
        self.inner.state.borrow().is_live()
    }

    pub fn time_label(&self) -> String {
        self.inner.state.borrow().time_label()
    }

    pub fn on_timeline_updated(&self, frames: Timeline) {
        self.inner.state.send_if_modified(|state| {
            if state.available_frames == frames && !state.is_loading {
                return false;
            }
            state.apply_timeline(frames);
            true
        });
    }

    /// Start playback. Must be called from within a Tokio runtime.
    pub fn play(&self) {
        let mut ticker = self.inner.ticker.lock();
        if ticker.is_some() && self.inner.state.borrow().is_playing {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Cannot start radar playback outside a runtime: {}", e);
                return;
            }
        };

        if let Some(previous) = ticker.take() {
            previous.cancel();
        }
        let token = CancellationToken::new();
        *ticker = Some(token.clone());

        self.inner.state.send_if_modified(|state| {
            let changed = !state.is_playing;
            state.is_playing = true;
            changed
        });
        handle.spawn(run_ticker(Arc::downgrade(&self.inner), token));
        drop(ticker);

        tracing::debug!("Radar playback started");
    }

    pub fn pause(&self) {
        self.inner.stop_ticker_and(|state| {
            let changed = state.is_playing;
            state.is_playing = false;
            changed
        });
    }

    pub fn toggle_playback(&self) {
        if self.inner.state.borrow().is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jump to a scrub position. Always pauses.
    pub fn seek(&self, progress: f64) {
        self.inner.stop_ticker_and(|state| {
            state.seek(progress);
            true
        });
    }

    /// Change the playback multiplier; takes effect from the next tick.
    pub fn set_speed(&self, multiplier: f64) {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            tracing::warn!("Ignoring invalid playback speed {}", multiplier);
            return;
        }
        let clamped = multiplier.clamp(MIN_PLAYBACK_SPEED, MAX_PLAYBACK_SPEED);
        if clamped != multiplier {
            tracing::warn!("Playback speed {} clamped to {}", multiplier, clamped);
        }
        let multiplier = clamped;
        self.inner.state.send_if_modified(|state| {
            if state.playback_speed == multiplier {
                return false;
            }
            state.playback_speed = multiplier;
            true
        });
    }

    /// Stop the ticker for good.
    pub fn shutdown(&self) {
        self.pause();
    }
}

async fn run_ticker(inner: Weak<Inner>, token: CancellationToken) {
    loop {
        let Some(delay) = inner.upgrade().map(|inner| inner.frame_delay()) else {
            break;
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        // A pause may land between the sleep and this tick
        if token.is_cancelled() {
            break;
        }
        let mut playing = true;
        inner.state.send_if_modified(|state| {
            if !state.is_playing {
                playing = false;
                return false;
            }
            let before = state.current_frame_index;
            state.advance();
            before != state.current_frame_index
        });
        if !playing {
            break;
        }
    }
}
