//! Integration tests for RadarSession against a mock radar backend.

use std::io::Cursor;
use std::time::Duration;

use radarscope_radar::{
    EngineConfig, ProviderEndpoints, RadarError, RadarLayer, RadarProvider, RadarSession,
    TileCoord, Timeline, TimelineConfig,
};
use tokio::sync::watch;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LONDON: (f64, f64) = (51.5074, -0.1278);
const DENVER: (f64, f64) = (39.74, -104.99);

fn png_bytes() -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(8, 8, image::Rgba([10, 200, 40, 255]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn config_for(server: &MockServer) -> EngineConfig {
    // Long enough that only the initial fetch runs during a test
    config_with_refresh(server, Duration::from_secs(3600))
}

fn config_with_refresh(server: &MockServer, refresh_interval: Duration) -> EngineConfig {
    EngineConfig {
        timeline: TimelineConfig {
            primary_url: format!("{}/public/weather-maps.json", server.uri()),
            fallback_url: format!("{}/api/maps.json", server.uri()),
            timeout: Duration::from_secs(2),
            refresh_interval,
        },
        endpoints: ProviderEndpoints {
            noaa_servers: vec![server.uri()],
            rainviewer_servers: vec![server.uri()],
        },
        ..EngineConfig::default()
    }
}

async fn mount_timeline(server: &MockServer, frames: &[i64]) {
    let past: Vec<_> = frames
        .iter()
        .map(|t| serde_json::json!({"time": t, "path": format!("/v2/radar/{}", t)}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/public/weather-maps.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "radar": {"past": past, "nowcast": []}
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;
}

async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, predicate: F)
where
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("sender dropped");
}

#[tokio::test]
async fn test_session_loads_timeline_and_publishes_overlay() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000, 1_600, 2_200]).await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    let mut animation = session.animation();
    wait_until(&mut animation, |s| !s.is_loading).await;

    let state = animation.borrow().clone();
    assert_eq!(state.current_frame_index, Some(2));
    assert_eq!(state.time_label(), "LIVE");
    assert_eq!(session.timeline().timestamps(), vec![1_000, 1_600, 2_200]);

    let mut status = session.status();
    wait_until(&mut status, |s| s.is_operational).await;
    assert_eq!(status.borrow().provider, RadarProvider::RainViewer);
    assert_eq!(status.borrow().last_updated_epoch_seconds, Some(2_200));

    let mut overlay = session.overlay();
    wait_until(&mut overlay, |o| o.as_ref().is_some_and(|o| o.frame == Some(2_200))).await;
    let descriptor = overlay.borrow().clone().unwrap();
    assert!(descriptor.url_template.contains("/v2/radar/2200/256/"));

    session.shutdown();
}

#[tokio::test]
async fn test_seek_moves_overlay_and_tile_frame() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000, 1_600, 2_200]).await;
    Mock::given(method("GET"))
        .and(path("/v2/radar/1000/256/4/7/5/2/1_1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
        .expect(1)
        .mount(&server)
        .await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    let mut animation = session.animation();
    wait_until(&mut animation, |s| !s.is_loading).await;

    session.seek(0.0);
    assert!(!animation.borrow().is_playing);
    assert_eq!(animation.borrow().time_label(), "-20m");
    assert_eq!(session.overlay().borrow().as_ref().and_then(|o| o.frame), Some(1_000));

    let tile = session.fetch_tile(4, 7, 5).await.unwrap();
    assert_eq!(tile.width(), 8);
    // Second request is served from the cache
    session.fetch_tile(4, 7, 5).await.unwrap();
    assert_eq!(session.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_moving_into_us_switches_to_noaa() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000, 1_600]).await;
    Mock::given(method("GET"))
        .and(path_regex("^/cache/tile.py/1.0.0/nexrad-n0q-900913/6/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png_bytes()))
        .mount(&server)
        .await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    assert_eq!(session.provider(), RadarProvider::RainViewer);

    session.set_location(DENVER.0, DENVER.1);
    assert_eq!(session.provider(), RadarProvider::Noaa);
    assert_eq!(session.status().borrow().provider, RadarProvider::Noaa);

    let overlay = session.overlay().borrow().clone().unwrap();
    assert_eq!(overlay.provider, RadarProvider::Noaa);
    assert_eq!(overlay.frame, None);
    assert_eq!(overlay.max_zoom, 18);

    let results = session
        .fetch_tiles(&[TileCoord::new(6, 13, 24), TileCoord::new(6, 14, 24)])
        .await
        .unwrap();
    assert!(results.iter().all(|(_, r)| r.is_ok()));
}

#[tokio::test]
async fn test_toggling_precipitation_removes_overlay() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000]).await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    assert!(session.overlay().borrow().is_some());

    session.toggle_layer(RadarLayer::Precipitation);
    assert!(session.overlay().borrow().is_none());
    let result = session.fetch_tile(3, 1, 1).await;
    assert!(matches!(result, Err(RadarError::LayerUnavailable(_))));

    session.toggle_layer(RadarLayer::Clouds);
    assert_eq!(session.active_layers(), vec![RadarLayer::Clouds]);

    session.select_layer(RadarLayer::Precipitation);
    assert_eq!(session.active_layers(), vec![RadarLayer::Precipitation]);
    assert!(session.overlay().borrow().is_some());
}

#[tokio::test]
async fn test_failed_refresh_keeps_frames_and_playback() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000, 1_600, 2_200]).await;
    // Everything after the first timeline response fails
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    let mut animation = session.animation();
    wait_until(&mut animation, |s| !s.is_loading).await;
    session.seek(0.5);
    let before = animation.borrow().clone();

    let result = session.refresh_timeline().await;
    assert!(matches!(result, Err(RadarError::TimelineUnavailable)));

    assert_eq!(*animation.borrow(), before);
    assert_eq!(session.timeline(), Timeline::from_timestamps([1_000, 1_600, 2_200]));

    let status = session.status().borrow().clone();
    assert!(!status.is_operational);
    assert_eq!(status.message.as_deref(), Some("Radar temporarily unavailable"));
    assert_eq!(status.last_updated_epoch_seconds, Some(2_200));
}

#[tokio::test]
async fn test_shutdown_stops_playback() {
    let server = MockServer::start().await;
    mount_timeline(&server, &[1_000, 1_600, 2_200]).await;

    let session = RadarSession::start(config_for(&server), LONDON.0, LONDON.1).unwrap();
    let mut animation = session.animation();
    wait_until(&mut animation, |s| !s.is_loading).await;

    session.play();
    assert!(animation.borrow().is_playing);
    session.shutdown();
    assert!(!animation.borrow().is_playing);

    let result = session.fetch_tile(3, 1, 1).await;
    assert!(matches!(result, Err(RadarError::Cancelled)));
}

async fn timeline_requests(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.url.path() == "/public/weather-maps.json")
        .count()
}

#[tokio::test]
async fn test_shutdown_stops_timeline_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/weather-maps.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([1_000, 1_600])),
        )
        .mount(&server)
        .await;

    let config = config_with_refresh(&server, Duration::from_millis(50));
    let session = RadarSession::start(config, LONDON.0, LONDON.1).unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while timeline_requests(&server).await < 3 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("refresh loop never repeated");

    session.shutdown();
    // Let a request already on the wire land before counting
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_shutdown = timeline_requests(&server).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(timeline_requests(&server).await, after_shutdown);
}
