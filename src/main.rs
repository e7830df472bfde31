use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use radarscope_core::{AppError, Config};
use radarscope_radar::{format_preview_status, RadarLayer, RadarSession};

mod grid;

#[derive(Parser, Debug)]
#[command(name = "radarscope", about = "Fetch radar frames and tiles for a location")]
struct Cli {
    /// Latitude (defaults to the configured location)
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Longitude (defaults to the configured location)
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Overlay layer to show
    #[arg(long, default_value = "precipitation", value_parser = parse_layer)]
    layer: RadarLayer,

    /// Map zoom level; clamped to the provider's maximum
    #[arg(long, default_value_t = 6)]
    zoom: u8,

    /// Tiles to fetch in each direction around the centre tile
    #[arg(long, default_value_t = 1)]
    radius: u32,

    /// Play the animation for this many frame ticks
    #[arg(long, default_value_t = 0)]
    play: u32,

    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    radarscope_core::init()?;
    let cli = Cli::parse();

    let (config, _) = Config::load_validated(cli.config.as_deref())?;
    let lat = cli.lat.unwrap_or(config.location.latitude);
    let lon = cli.lon.unwrap_or(config.location.longitude);

    let session = RadarSession::start(config.radar_engine(), lat, lon).map_err(AppError::from)?;
    session.select_layer(cli.layer);
    let provider = session.provider();
    println!("Location: {:.4}, {:.4}", lat, lon);
    println!("Layer:    {}", cli.layer.title());
    println!("Provider: {} ({})", provider, provider.attribution());

    match session.refresh_timeline().await {
        Ok(timeline) => {
            println!("Frames:   {}", timeline.len());
            if let (Some(first), Some(latest)) = (timeline.frames().first(), timeline.latest()) {
                println!("          {} .. {}", format_time(first.time), format_time(latest.time));
            }
        }
        Err(e) => {
            let e = AppError::from(e);
            tracing::warn!("Timeline fetch failed: {}", e);
            println!("Frames:   {}", e.user_message());
        }
    }
    println!(
        "Status:   {}",
        format_preview_status(&session.status().borrow(), chrono::Utc::now().timestamp())
    );

    let zoom = cli.zoom.min(provider.max_zoom());
    let coords = grid::tiles_around(lat, lon, zoom, cli.radius);
    let results = match session.fetch_tiles(&coords).await {
        Ok(results) => results,
        Err(e) => {
            println!("Tiles:    {}", AppError::from(e).user_message());
            session.shutdown();
            return Ok(());
        }
    };

    let mut fetched = 0;
    for (coord, result) in &results {
        match result {
            Ok(tile) => {
                fetched += 1;
                tracing::debug!(
                    "Tile {}/{}/{}: {}x{} ({} bytes)",
                    coord.zoom,
                    coord.x,
                    coord.y,
                    tile.width(),
                    tile.height(),
                    tile.size_bytes()
                );
            }
            Err(e) => println!("Tile {}/{}/{}: {}", coord.zoom, coord.x, coord.y, e),
        }
    }
    let stats = session.cache().stats();
    println!(
        "Tiles:    {}/{} at zoom {} ({} KiB cached, {} hits, {} misses)",
        fetched,
        results.len(),
        zoom,
        session.cache().size_bytes() / 1024,
        stats.hits,
        stats.misses
    );

    if cli.play > 0 {
        play(&session, cli.play, cli.speed).await?;
    }

    session.shutdown();
    Ok(())
}

async fn play(session: &RadarSession, ticks: u32, speed: f64) -> Result<()> {
    if session.timeline().len() < 2 {
        println!("Playback: not enough frames to animate");
        return Ok(());
    }

    let mut animation = session.animation();
    session.set_speed(speed);
    session.play();
    animation.mark_unchanged();

    let mut shown = 0;
    while shown < ticks {
        tokio::time::timeout(Duration::from_secs(5), animation.changed())
            .await
            .context("Playback stalled")??;

        let state = animation.borrow_and_update().clone();
        if let Some(frame) = state.current_frame() {
            shown += 1;
            println!("{:>6}  {}", state.time_label(), format_time(frame));
        }
    }

    session.pause();
    Ok(())
}

fn parse_layer(value: &str) -> Result<RadarLayer, String> {
    RadarLayer::from_id(value).ok_or_else(|| {
        let known: Vec<&str> = RadarLayer::ALL.iter().map(|l| l.layer_id()).collect();
        format!("unknown layer '{}' (expected one of: {})", value, known.join(", "))
    })
}

fn format_time(epoch_seconds: i64) -> String {
    chrono::DateTime::from_timestamp(epoch_seconds, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| epoch_seconds.to_string())
}
