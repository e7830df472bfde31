//! Geographic provider selection and tile URL templates.
//!
//! Locations inside the continental-US bounding box are served by the NOAA
//! NEXRAD mosaic; everything else falls back to RainViewer's global composite.

use std::sync::Arc;

use crate::error::RadarError;
use crate::types::{RadarProvider, TileCoord};

pub const NOAA_SERVERS: [&str; 2] = [
    "https://mesonet.agron.iastate.edu",
    "https://mesonet1.agron.iastate.edu",
];

pub const RAINVIEWER_SERVERS: [&str; 3] = [
    "https://tilecache.rainviewer.com",
    "https://a.tilecache.rainviewer.com",
    "https://b.tilecache.rainviewer.com",
];

/// Path segment RainViewer understands as "most recent frame"
pub const LATEST_FRAME_TOKEN: &str = "last";

const US_MIN_LAT: f64 = 24.0;
const US_MAX_LAT: f64 = 50.0;
const US_MIN_LON: f64 = -125.0;
const US_MAX_LON: f64 = -66.0;

const NOAA_LAYER_PATH: &str = "cache/tile.py/1.0.0/nexrad-n0q-900913";
// 256px tiles, color scheme 2 (original), smoothing on, snow on
const RAINVIEWER_TILE_OPTIONS: &str = "2/1_1.png";

/// Whether a coordinate falls inside the continental-US box (inclusive).
pub fn is_continental_us(lat: f64, lon: f64) -> bool {
    (US_MIN_LAT..=US_MAX_LAT).contains(&lat) && (US_MIN_LON..=US_MAX_LON).contains(&lon)
}

/// Pure provider choice for a coordinate.
pub fn select_provider(lat: f64, lon: f64) -> RadarProvider {
    if is_continental_us(lat, lon) {
        RadarProvider::Noaa
    } else {
        RadarProvider::RainViewer
    }
}

/// Base URLs for each provider's tile servers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub noaa_servers: Vec<String>,
    pub rainviewer_servers: Vec<String>,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            noaa_servers: NOAA_SERVERS.iter().map(|s| s.to_string()).collect(),
            rainviewer_servers: RAINVIEWER_SERVERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ProviderEndpoints {
    fn servers(&self, provider: RadarProvider) -> &[String] {
        match provider {
            RadarProvider::Noaa => &self.noaa_servers,
            RadarProvider::RainViewer => &self.rainviewer_servers,
        }
    }
}

/// Maps coordinates to a [`TileSource`].
#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    endpoints: Arc<ProviderEndpoints>,
}

impl ProviderSelector {
    pub fn new(endpoints: ProviderEndpoints) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
        }
    }

    /// Select the provider for a location. Deterministic, no I/O.
    pub fn select(&self, lat: f64, lon: f64) -> TileSource {
        self.source_for(select_provider(lat, lon))
    }

    pub fn source_for(&self, provider: RadarProvider) -> TileSource {
        TileSource {
            provider,
            endpoints: Arc::clone(&self.endpoints),
        }
    }
}

/// A provider together with its URL template function.
#[derive(Debug, Clone)]
pub struct TileSource {
    provider: RadarProvider,
    endpoints: Arc<ProviderEndpoints>,
}

impl TileSource {
    pub fn provider(&self) -> RadarProvider {
        self.provider
    }

    /// Build the URL for one tile.
    ///
    /// NOAA ignores `frame`: its endpoint always serves the current mosaic.
    /// RainViewer falls back to the "last" token when no frame is known.
    pub fn tile_url(&self, coord: TileCoord, frame: Option<i64>) -> Result<String, RadarError> {
        let max = self.provider.max_zoom();
        if coord.zoom > max {
            return Err(RadarError::ZoomOutOfRange {
                zoom: coord.zoom,
                max,
            });
        }

        let server = self.server_for(coord);
        let url = match self.provider {
            RadarProvider::Noaa => format!(
                "{}/{}/{}/{}/{}.png",
                server, NOAA_LAYER_PATH, coord.zoom, coord.x, coord.y
            ),
            RadarProvider::RainViewer => format!(
                "{}/v2/radar/{}/256/{}/{}/{}/{}",
                server,
                frame_segment(frame),
                coord.zoom,
                coord.x,
                coord.y,
                RAINVIEWER_TILE_OPTIONS
            ),
        };
        Ok(url)
    }

    /// Template with `{z}`, `{x}`, `{y}` placeholders for a map surface.
    pub fn url_template(&self, frame: Option<i64>) -> String {
        let server = self.server_at(0);
        match self.provider {
            RadarProvider::Noaa => format!("{}/{}/{{z}}/{{x}}/{{y}}.png", server, NOAA_LAYER_PATH),
            RadarProvider::RainViewer => format!(
                "{}/v2/radar/{}/256/{{z}}/{{x}}/{{y}}/{}",
                server,
                frame_segment(frame),
                RAINVIEWER_TILE_OPTIONS
            ),
        }
    }

    fn server_for(&self, coord: TileCoord) -> &str {
        let index = match self.provider {
            RadarProvider::Noaa => coord.zoom as usize,
            RadarProvider::RainViewer => coord.x as usize + coord.y as usize,
        };
        self.server_at(index)
    }

    fn server_at(&self, index: usize) -> &str {
        let servers = self.endpoints.servers(self.provider);
        if servers.is_empty() {
            let defaults: &[&'static str] = match self.provider {
                RadarProvider::Noaa => &NOAA_SERVERS,
                RadarProvider::RainViewer => &RAINVIEWER_SERVERS,
            };
            return defaults[index % defaults.len()];
        }
        servers[index % servers.len()].trim_end_matches('/')
    }
}

fn frame_segment(frame: Option<i64>) -> String {
    match frame {
        Some(ts) => ts.to_string(),
        None => LATEST_FRAME_TOKEN.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_us_locations_select_noaa() {
        assert_eq!(select_provider(39.1, -94.6), RadarProvider::Noaa);
        assert_eq!(select_provider(47.6062, -122.3321), RadarProvider::Noaa);
        assert_eq!(select_provider(25.76, -80.19), RadarProvider::Noaa);
    }

    #[test]
    fn test_international_locations_select_rainviewer() {
        assert_eq!(select_provider(51.5074, -0.1278), RadarProvider::RainViewer);
        assert_eq!(select_provider(-33.86, 151.2), RadarProvider::RainViewer);
        // Anchorage sits north of the box
        assert_eq!(select_provider(61.2, -149.9), RadarProvider::RainViewer);
        // Honolulu sits south-west of the box
        assert_eq!(select_provider(21.3, -157.8), RadarProvider::RainViewer);
    }

    #[test]
    fn test_bounding_box_is_inclusive() {
        assert_eq!(select_provider(24.0, -100.0), RadarProvider::Noaa);
        assert_eq!(select_provider(50.0, -100.0), RadarProvider::Noaa);
        assert_eq!(select_provider(40.0, -125.0), RadarProvider::Noaa);
        assert_eq!(select_provider(40.0, -66.0), RadarProvider::Noaa);
        assert_eq!(select_provider(24.0, -125.0), RadarProvider::Noaa);
        assert_eq!(select_provider(50.0, -66.0), RadarProvider::Noaa);
    }

    #[test]
    fn test_just_outside_bounding_box() {
        assert_eq!(select_provider(23.999, -100.0), RadarProvider::RainViewer);
        assert_eq!(select_provider(50.001, -100.0), RadarProvider::RainViewer);
        assert_eq!(select_provider(40.0, -125.001), RadarProvider::RainViewer);
        assert_eq!(select_provider(40.0, -65.999), RadarProvider::RainViewer);
    }

    #[test]
    fn test_rainviewer_url_with_timestamp() {
        let source = ProviderSelector::default().select(51.5, 0.0);
        let url = source.tile_url(TileCoord::new(4, 5, 6), Some(1620000000)).unwrap_or_default();
        // (5 + 6) % 3 == 2 -> b.tilecache
        assert_eq!(
            url,
            "https://b.tilecache.rainviewer.com/v2/radar/1620000000/256/4/5/6/2/1_1.png"
        );
    }

    #[test]
    fn test_rainviewer_url_falls_back_to_last() {
        let source = ProviderSelector::default().source_for(RadarProvider::RainViewer);
        let url = source.tile_url(TileCoord::new(3, 0, 0), None).unwrap_or_default();
        assert_eq!(url, "https://tilecache.rainviewer.com/v2/radar/last/256/3/0/0/2/1_1.png");
    }

    #[test]
    fn test_noaa_url_ignores_frame() {
        let source = ProviderSelector::default().select(39.0, -94.0);
        let url = source.tile_url(TileCoord::new(7, 20, 30), Some(1620000000)).unwrap_or_default();
        // 7 % 2 == 1 -> mesonet1
        assert_eq!(
            url,
            "https://mesonet1.agron.iastate.edu/cache/tile.py/1.0.0/nexrad-n0q-900913/7/20/30.png"
        );
    }

    #[test]
    fn test_zoom_beyond_provider_max_is_rejected() {
        let source = ProviderSelector::default().source_for(RadarProvider::RainViewer);
        let result = source.tile_url(TileCoord::new(13, 1, 1), None);
        assert!(matches!(result, Err(RadarError::ZoomOutOfRange { zoom: 13, max: 12 })));

        let noaa = ProviderSelector::default().source_for(RadarProvider::Noaa);
        assert!(noaa.tile_url(TileCoord::new(18, 1, 1), None).is_ok());
    }

    #[test]
    fn test_custom_endpoints_trim_trailing_slash() {
        let selector = ProviderSelector::new(ProviderEndpoints {
            noaa_servers: vec!["http://127.0.0.1:9000/".to_string()],
            rainviewer_servers: vec!["http://127.0.0.1:9001/".to_string()],
        });
        let url = selector
            .select(40.0, -100.0)
            .tile_url(TileCoord::new(2, 1, 1), None)
            .unwrap_or_default();
        assert_eq!(
            url,
            "http://127.0.0.1:9000/cache/tile.py/1.0.0/nexrad-n0q-900913/2/1/1.png"
        );
    }

    #[test]
    fn test_url_templates() {
        let selector = ProviderSelector::default();
        assert_eq!(
            selector.source_for(RadarProvider::RainViewer).url_template(Some(100)),
            "https://tilecache.rainviewer.com/v2/radar/100/256/{z}/{x}/{y}/2/1_1.png"
        );
        assert!(selector
            .source_for(RadarProvider::Noaa)
            .url_template(None)
            .ends_with("nexrad-n0q-900913/{z}/{x}/{y}.png"));
    }
}
