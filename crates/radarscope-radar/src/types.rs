use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Upstream radar imagery source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RadarProvider {
    /// NOAA NEXRAD mosaic served by the Iowa Environmental Mesonet (US only)
    Noaa,
    /// RainViewer global composite
    RainViewer,
}

impl RadarProvider {
    /// Short identifier used in cache keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noaa => "noaa",
            Self::RainViewer => "rainviewer",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Noaa => "NOAA NEXRAD Radar",
            Self::RainViewer => "RainViewer Radar",
        }
    }

    /// Highest zoom level the provider serves tiles for
    pub fn max_zoom(&self) -> u8 {
        match self {
            Self::Noaa => 18,
            Self::RainViewer => 12,
        }
    }

    pub fn attribution(&self) -> &'static str {
        match self {
            Self::Noaa => "Radar data © NOAA NEXRAD via Iowa Environmental Mesonet",
            Self::RainViewer => "Radar data © RainViewer",
        }
    }

    /// Whether the tile endpoint accepts a historical frame parameter
    pub fn supports_history(&self) -> bool {
        matches!(self, Self::RainViewer)
    }
}

impl fmt::Display for RadarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Map overlay layers a user can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RadarLayer {
    #[default]
    Precipitation,
    Clouds,
    Temperature,
    Wind,
    Pressure,
}

impl RadarLayer {
    pub const ALL: [RadarLayer; 5] = [
        Self::Precipitation,
        Self::Clouds,
        Self::Temperature,
        Self::Wind,
        Self::Pressure,
    ];

    /// Layer for a [`layer_id`](Self::layer_id), case-insensitive
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|layer| layer.layer_id().eq_ignore_ascii_case(id.trim()))
    }

    /// Stable identifier used in cache keys
    pub fn layer_id(&self) -> &'static str {
        match self {
            Self::Precipitation => "precipitation",
            Self::Clouds => "clouds",
            Self::Temperature => "temperature",
            Self::Wind => "wind",
            Self::Pressure => "pressure",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Precipitation => "Precipitation",
            Self::Clouds => "Clouds",
            Self::Temperature => "Temperature",
            Self::Wind => "Wind",
            Self::Pressure => "Pressure",
        }
    }

    /// Only precipitation is backed by the radar providers
    pub fn has_radar_imagery(&self) -> bool {
        matches!(self, Self::Precipitation)
    }
}

/// A single instant (Unix seconds) for which upstream radar imagery exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RadarFrame {
    pub time: i64,
}

impl RadarFrame {
    pub fn new(time: i64) -> Self {
        Self { time }
    }
}

/// Ordered, deduplicated set of available radar frames.
///
/// A timeline is immutable; a refresh produces a new one. Cloning is cheap,
/// so snapshots can be handed to the animation controller and the UI freely.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Timeline {
    frames: Arc<[RadarFrame]>,
}

impl Timeline {
    /// Build a timeline from frames in any order, dropping duplicates and
    /// non-positive timestamps.
    pub fn from_unsorted<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = RadarFrame>,
    {
        let mut frames: Vec<RadarFrame> = frames.into_iter().filter(|f| f.time > 0).collect();
        frames.sort_unstable();
        frames.dedup();
        Self {
            frames: frames.into(),
        }
    }

    pub fn from_timestamps<I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Self::from_unsorted(timestamps.into_iter().map(RadarFrame::new))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[RadarFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RadarFrame> {
        self.frames.get(index).copied()
    }

    /// The most recent frame ("live")
    pub fn latest(&self) -> Option<RadarFrame> {
        self.frames.last().copied()
    }

    pub fn last_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.frames.iter().map(|f| f.time).collect()
    }
}

impl fmt::Debug for Timeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeline")
            .field("len", &self.frames.len())
            .field("first", &self.frames.first().map(|f| f.time))
            .field("latest", &self.latest().map(|f| f.time))
            .finish()
    }
}

/// Time component of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRef {
    /// A concrete frame timestamp
    At(i64),
    /// "Most recent" imagery, valid only within one wall-clock bucket
    Live { bucket: i64 },
}

impl FrameRef {
    /// Live reference for the bucket containing `now_secs`
    pub fn live_at(now_secs: i64, ttl_secs: i64) -> Self {
        Self::Live {
            bucket: now_secs.div_euclid(ttl_secs.max(1)),
        }
    }

    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::At(ts) => Some(*ts),
            Self::Live { .. } => None,
        }
    }
}

/// Identity of one rendered tile image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub layer_id: String,
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
    pub frame: FrameRef,
}

impl TileKey {
    pub fn new(layer_id: impl Into<String>, zoom: u8, x: u32, y: u32, frame: FrameRef) -> Self {
        Self {
            layer_id: layer_id.into(),
            zoom,
            x,
            y,
            frame,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            FrameRef::At(ts) => write!(f, "{}-{}-{}-{}-{}", self.layer_id, self.zoom, self.x, self.y, ts),
            FrameRef::Live { bucket } => write!(
                f,
                "{}-{}-{}-{}-live@{}",
                self.layer_id, self.zoom, self.x, self.y, bucket
            ),
        }
    }
}

/// `(zoom, x, y)` address of a map cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }
}

/// A decoded radar tile. Immutable once built.
#[derive(Clone)]
pub struct RadarTile {
    encoded: Bytes,
    image: RgbaImage,
}

impl RadarTile {
    pub fn new(encoded: Bytes, image: RgbaImage) -> Self {
        Self { encoded, image }
    }

    /// Original encoded payload (PNG), as handed to a map surface
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    /// Decoded RGBA pixels
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Memory held by this tile: encoded bytes plus decoded pixels
    pub fn size_bytes(&self) -> usize {
        self.encoded.len() + self.image.as_raw().len()
    }
}

impl fmt::Debug for RadarTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadarTile")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("size_bytes", &self.size_bytes())
            .finish()
    }
}
