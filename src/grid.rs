//! Web Mercator helpers for picking the tiles around a location.

use radarscope_radar::TileCoord;

// Mercator is undefined at the poles
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Fractional tile X for a longitude
pub fn lon_to_x(lon: f64, zoom: u8) -> f64 {
    let n = 2_f64.powi(zoom as i32);
    ((lon + 180.0) / 360.0) * n
}

/// Fractional tile Y for a latitude
pub fn lat_to_y(lat: f64, zoom: u8) -> f64 {
    let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let n = 2_f64.powi(zoom as i32);
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0;
    y * n
}

/// Tile containing `(lat, lon)` at `zoom`
pub fn tile_for(lat: f64, lon: f64, zoom: u8) -> TileCoord {
    let max = (1u64 << zoom).saturating_sub(1) as f64;
    let x = lon_to_x(lon, zoom).floor().clamp(0.0, max) as u32;
    let y = lat_to_y(lat, zoom).floor().clamp(0.0, max) as u32;
    TileCoord::new(zoom, x, y)
}

/// Square of tiles centred on `(lat, lon)`, `radius` tiles in each direction.
///
/// X wraps around the antimeridian; rows past the poles are dropped.
pub fn tiles_around(lat: f64, lon: f64, zoom: u8, radius: u32) -> Vec<TileCoord> {
    let center = tile_for(lat, lon, zoom);
    let n = 1i64 << zoom;
    let radius = radius as i64;

    let mut tiles = Vec::new();
    for dy in -radius..=radius {
        let y = center.y as i64 + dy;
        if y < 0 || y >= n {
            continue;
        }
        for dx in -radius..=radius {
            let x = (center.x as i64 + dx).rem_euclid(n);
            let coord = TileCoord::new(zoom, x as u32, y as u32);
            if !tiles.contains(&coord) {
                tiles.push(coord);
            }
        }
    }
    tiles
}
