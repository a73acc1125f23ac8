//! Slippy-map tile math.
//!
//! Uses the OpenStreetMap tile naming convention:
//! - `zoom` is the zoom level (0 to [`MAX_ZOOM`])
//! - `x` is the column (0 to 2^zoom - 1, from west to east)
//! - `y` is the row (0 to 2^zoom - 1, from north to south)
//!
//! Increasing latitude decreases the row index while increasing longitude
//! increases the column index, so every range computation here goes through
//! an elementwise min/max of the projected corners.
//!
//! ## Latitude clamp
//!
//! Web Mercator is undefined at the poles (`asinh(tan(lat))` diverges). All
//! latitudes are clamped to ±[`MAX_LATITUDE`] before projection, which is the
//! edge of the square world map. A bounding box reaching past that line simply
//! covers the first or last row.

use crate::{Result, TileError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Deepest zoom level accepted by the engine.
pub const MAX_ZOOM: u8 = 24;

/// Northern/southern limit of the Web Mercator square, `atan(sinh(π))` in degrees.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// A tile address `(zoom, x, y)` in the `2^zoom × 2^zoom` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level.
    pub zoom: u8,
    /// Column, 0 at 180°W, increases eastward.
    pub x: u32,
    /// Row, 0 at ~85.05°N, increases southward.
    pub y: u32,
}

impl TileCoord {
    /// Create a tile coordinate, checking it lies inside the grid.
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<Self> {
        check_zoom(zoom)?;
        let n = grid_size(zoom);
        if u64::from(x) >= n || u64::from(y) >= n {
            return Err(TileError::OutOfGrid { zoom, x, y });
        }
        Ok(Self { zoom, x, y })
    }

    /// Tile containing the given point.
    pub fn from_lat_lon(lat: f64, lon: f64, zoom: u8) -> Result<Self> {
        let (x, y) = lat_lon_to_tile(lat, lon, zoom)?;
        Ok(Self { zoom, x, y })
    }

    /// Geographic bounds of this tile.
    ///
    /// Returns (min_lat, max_lat, min_lon, max_lon).
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let n = grid_size(self.zoom) as f64;

        let min_lon = self.x as f64 / n * 360.0 - 180.0;
        let max_lon = (self.x as f64 + 1.0) / n * 360.0 - 180.0;

        let max_lat = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan().to_degrees();
        let min_lat = (PI * (1.0 - 2.0 * (self.y as f64 + 1.0) / n)).sinh().atan().to_degrees();

        (min_lat, max_lat, min_lon, max_lon)
    }

    /// Path of this tile relative to the root of a tile tree: `{zoom}/{x}/{y}.{ext}`.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        PathBuf::from(self.zoom.to_string())
            .join(self.x.to_string())
            .join(format!("{}.{}", self.y, extension))
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// A geographic rectangle given by two corners in degrees.
///
/// Corners are conventionally southwest and northeast, but nothing relies on
/// it: swapped corners produce the same tile ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern latitude.
    pub min_lat: f64,
    /// Western longitude.
    pub min_lon: f64,
    /// Northern latitude.
    pub max_lat: f64,
    /// Eastern longitude.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Create a bounding box from southwest and northeast corners.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// True if all four coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.min_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lat.is_finite()
            && self.max_lon.is_finite()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) to ({}, {})",
            self.min_lat, self.min_lon, self.max_lat, self.max_lon
        )
    }
}

impl FromStr for BoundingBox {
    type Err = String;

    /// Parse `min_lat,min_lon,max_lat,max_lon`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| format!("invalid bounding box '{}': {}", s, e))?;

        match parts.as_slice() {
            [min_lat, min_lon, max_lat, max_lon] => {
                Ok(BoundingBox::new(*min_lat, *min_lon, *max_lat, *max_lon))
            }
            _ => Err(format!(
                "invalid bounding box '{}': expected 4 comma-separated values, got {}",
                s,
                parts.len()
            )),
        }
    }
}

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    /// Zoom level of every tile in the range.
    pub zoom: u8,
    /// Westernmost column.
    pub x_min: u32,
    /// Easternmost column.
    pub x_max: u32,
    /// Northernmost row.
    pub y_min: u32,
    /// Southernmost row.
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn len(&self) -> u64 {
        (u64::from(self.x_max - self.x_min) + 1) * (u64::from(self.y_max - self.y_min) + 1)
    }

    /// A range always holds at least one tile.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// True if the tile lies inside this range.
    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.zoom == self.zoom
            && (self.x_min..=self.x_max).contains(&coord.x)
            && (self.y_min..=self.y_max).contains(&coord.y)
    }

    /// Lazily enumerate the tiles in row-major order (x outer, y inner).
    ///
    /// Every call starts a fresh enumeration from the first tile; nothing is
    /// materialized, so ranges with tens of millions of tiles cost nothing to hold.
    pub fn iter(&self) -> TileRangeIter {
        TileRangeIter {
            range: *self,
            x: self.x_min,
            y: self.y_min,
            done: false,
        }
    }
}

impl IntoIterator for &TileRange {
    type Item = TileCoord;
    type IntoIter = TileRangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Row-major iterator over a [`TileRange`].
#[derive(Debug, Clone)]
pub struct TileRangeIter {
    range: TileRange,
    x: u32,
    y: u32,
    done: bool,
}

impl Iterator for TileRangeIter {
    type Item = TileCoord;

    fn next(&mut self) -> Option<TileCoord> {
        if self.done {
            return None;
        }

        let coord = TileCoord {
            zoom: self.range.zoom,
            x: self.x,
            y: self.y,
        };

        if self.y < self.range.y_max {
            self.y += 1;
        } else if self.x < self.range.x_max {
            self.x += 1;
            self.y = self.range.y_min;
        } else {
            self.done = true;
        }

        Some(coord)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.done {
            return (0, Some(0));
        }
        let rows = u64::from(self.range.y_max - self.range.y_min) + 1;
        let remaining_columns = u64::from(self.range.x_max - self.x);
        let remaining = remaining_columns * rows + u64::from(self.range.y_max - self.y) + 1;
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

/// Tiles per axis at `zoom`.
pub fn grid_size(zoom: u8) -> u64 {
    1u64 << zoom
}

fn check_zoom(zoom: u8) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(TileError::InvalidZoomLevel(zoom));
    }
    Ok(())
}

/// Project a point to the column/row of the tile containing it.
///
/// - x = floor((lon + 180) / 360 * 2^zoom)
/// - y = floor((1 - asinh(tan(lat)) / π) / 2 * 2^zoom)
///
/// Latitude is clamped to ±[`MAX_LATITUDE`] and longitude to ±180 first; the
/// result is clamped into the grid so `lon = 180` lands in the last column.
pub fn lat_lon_to_tile(lat: f64, lon: f64, zoom: u8) -> Result<(u32, u32)> {
    check_zoom(zoom)?;

    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let lon = lon.clamp(-180.0, 180.0);
    let n = grid_size(zoom) as f64;

    let x = ((lon + 180.0) / 360.0 * n).floor();
    let y = ((1.0 - lat.to_radians().tan().asinh() / PI) / 2.0 * n).floor();

    let max_index = n - 1.0;
    let x = x.clamp(0.0, max_index) as u32;
    let y = y.clamp(0.0, max_index) as u32;

    Ok((x, y))
}

/// Tile range covering a bounding box at one zoom level.
pub fn tile_range_for_bbox(bbox: &BoundingBox, zoom: u8) -> Result<TileRange> {
    let (x1, y1) = lat_lon_to_tile(bbox.min_lat, bbox.min_lon, zoom)?;
    let (x2, y2) = lat_lon_to_tile(bbox.max_lat, bbox.max_lon, zoom)?;

    Ok(TileRange {
        zoom,
        x_min: x1.min(x2),
        x_max: x1.max(x2),
        y_min: y1.min(y2),
        y_max: y1.max(y2),
    })
}

/// Per-zoom tile counts and their sum for a bounding box.
///
/// Uses [`tile_range_for_bbox`], the same range logic the scheduler uses, so
/// the estimate always matches what a download would enumerate.
pub fn estimate_tile_count(bbox: &BoundingBox, zoom_levels: &[u8]) -> Result<(Vec<(u8, u64)>, u64)> {
    let mut counts = Vec::with_capacity(zoom_levels.len());
    let mut total = 0u64;
    for &zoom in zoom_levels {
        let tiles = tile_range_for_bbox(bbox, zoom)?.len();
        counts.push((zoom, tiles));
        total += tiles;
    }
    Ok((counts, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equator_prime_meridian() {
        // The point (0, 0) is the top-left corner of the south-east quadrant
        let (x, y) = lat_lon_to_tile(0.0, 0.0, 12).unwrap();
        assert_eq!(x, 2048);
        assert_eq!(y, 2048);
    }

    #[test]
    fn test_zoom_zero_is_single_tile() {
        for (lat, lon) in [(89.0, -179.9), (-89.0, 179.9), (0.0, 0.0)] {
            assert_eq!(lat_lon_to_tile(lat, lon, 0).unwrap(), (0, 0));
        }
    }

    #[test]
    fn test_polar_latitudes_are_clamped() {
        let n = grid_size(10) as u32;
        assert_eq!(lat_lon_to_tile(90.0, 0.0, 10).unwrap().1, 0);
        assert_eq!(lat_lon_to_tile(-90.0, 0.0, 10).unwrap().1, n - 1);
    }

    #[test]
    fn test_antimeridian_stays_in_grid() {
        let n = grid_size(5) as u32;
        assert_eq!(lat_lon_to_tile(0.0, 180.0, 5).unwrap().0, n - 1);
        assert_eq!(lat_lon_to_tile(0.0, -180.0, 5).unwrap().0, 0);
        assert_eq!(lat_lon_to_tile(0.0, 540.0, 5).unwrap().0, n - 1);
    }

    #[test]
    fn test_indices_within_grid() {
        for zoom in [0u8, 1, 3, 8, 14, 19, MAX_ZOOM] {
            let n = grid_size(zoom);
            let mut lat = -MAX_LATITUDE;
            while lat <= MAX_LATITUDE {
                let mut lon = -180.0;
                while lon <= 180.0 {
                    let (x, y) = lat_lon_to_tile(lat, lon, zoom).unwrap();
                    assert!(u64::from(x) < n, "x={} zoom={} lon={}", x, zoom, lon);
                    assert!(u64::from(y) < n, "y={} zoom={} lat={}", y, zoom, lat);
                    lon += 7.3;
                }
                lat += 4.1;
            }
        }
    }

    #[test]
    fn test_x_monotonic_in_longitude() {
        for zoom in [1u8, 6, 12] {
            let mut prev = 0;
            let mut lon = -180.0;
            while lon <= 180.0 {
                let (x, _) = lat_lon_to_tile(12.5, lon, zoom).unwrap();
                assert!(x >= prev, "x decreased at lon={} zoom={}", lon, zoom);
                prev = x;
                lon += 0.37;
            }
        }
    }

    #[test]
    fn test_point_inside_its_tile() {
        let points = [
            (47.6062, -122.3321),
            (40.7128, -74.0060),
            (51.5074, -0.1278),
            (-33.8688, 151.2093),
            (-18.8792, 47.5079),
        ];

        for (lat, lon) in points {
            let coord = TileCoord::from_lat_lon(lat, lon, 14).unwrap();
            let (min_lat, max_lat, min_lon, max_lon) = coord.bounds();
            assert!(
                lat >= min_lat && lat <= max_lat,
                "lat {} not in [{}, {}] for tile {}",
                lat,
                min_lat,
                max_lat,
                coord
            );
            assert!(
                lon >= min_lon && lon <= max_lon,
                "lon {} not in [{}, {}] for tile {}",
                lon,
                min_lon,
                max_lon,
                coord
            );
        }
    }

    #[test]
    fn test_bounds_of_first_tile() {
        let coord = TileCoord::new(0, 0, 0).unwrap();
        let (min_lat, max_lat, min_lon, max_lon) = coord.bounds();
        approx::assert_abs_diff_eq!(max_lat, MAX_LATITUDE, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(min_lat, -MAX_LATITUDE, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(min_lon, -180.0);
        approx::assert_abs_diff_eq!(max_lon, 180.0);
    }

    #[test]
    fn test_invalid_zoom() {
        assert!(matches!(
            lat_lon_to_tile(0.0, 0.0, MAX_ZOOM + 1),
            Err(TileError::InvalidZoomLevel(_))
        ));
        assert!(TileCoord::new(2, 4, 0).is_err());
        assert!(TileCoord::new(2, 3, 3).is_ok());
    }

    #[test]
    fn test_small_bbox_around_origin() {
        let bbox = BoundingBox::new(-1.0, -1.0, 1.0, 1.0);
        let range = tile_range_for_bbox(&bbox, 2).unwrap();
        assert_eq!((range.x_min, range.x_max), (1, 2));
        assert_eq!((range.y_min, range.y_max), (1, 2));
        assert_eq!(range.len(), 4);

        let (per_zoom, total) = estimate_tile_count(&bbox, &[2]).unwrap();
        assert_eq!(per_zoom, vec![(2, 4)]);
        assert_eq!(total, 4);
    }

    #[test]
    fn test_corner_order_does_not_matter() {
        let canonical = BoundingBox::new(-25.32, 41.96, -11.44, 53.49);
        let swapped = BoundingBox::new(-11.44, 53.49, -25.32, 41.96);
        let mixed = BoundingBox::new(-25.32, 53.49, -11.44, 41.96);

        for zoom in [3u8, 7, 11] {
            let expected = tile_range_for_bbox(&canonical, zoom).unwrap();
            for bbox in [swapped, mixed] {
                let range = tile_range_for_bbox(&bbox, zoom).unwrap();
                assert_eq!(range, expected);
                assert!(range.x_min <= range.x_max);
                assert!(range.y_min <= range.y_max);
            }
        }
    }

    #[test]
    fn test_estimate_matches_range_len() {
        let bbox = BoundingBox::new(45.8, 5.9, 47.8, 10.5);
        let zooms = [4u8, 8, 12];
        let (per_zoom, total) = estimate_tile_count(&bbox, &zooms).unwrap();
        let mut sum = 0;
        for (zoom, count) in &per_zoom {
            let range = tile_range_for_bbox(&bbox, *zoom).unwrap();
            assert_eq!(*count, range.len());
            sum += count;
        }
        assert_eq!(sum, total);
    }

    #[test]
    fn test_range_iter_row_major() {
        let range = TileRange {
            zoom: 3,
            x_min: 2,
            x_max: 3,
            y_min: 5,
            y_max: 7,
        };
        let coords: Vec<(u32, u32)> = range.iter().map(|c| (c.x, c.y)).collect();
        assert_eq!(
            coords,
            vec![(2, 5), (2, 6), (2, 7), (3, 5), (3, 6), (3, 7)]
        );
        assert_eq!(coords.len() as u64, range.len());
        assert!(range.iter().all(|c| range.contains(&c)));
    }

    #[test]
    fn test_range_iter_restarts_from_beginning() {
        let range = TileRange {
            zoom: 1,
            x_min: 0,
            x_max: 1,
            y_min: 0,
            y_max: 1,
        };
        let first: Vec<_> = range.iter().collect();
        let second: Vec<_> = range.iter().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_range_iter_size_hint() {
        let range = TileRange {
            zoom: 4,
            x_min: 1,
            x_max: 3,
            y_min: 2,
            y_max: 5,
        };
        let mut iter = range.iter();
        assert_eq!(iter.size_hint(), (12, Some(12)));
        iter.next();
        iter.next();
        iter.next();
        iter.next();
        assert_eq!(iter.size_hint(), (8, Some(8)));
        assert_eq!(iter.count(), 8);
    }

    #[test]
    fn test_huge_range_is_lazy() {
        let range = TileRange {
            zoom: MAX_ZOOM,
            x_min: 0,
            x_max: (1 << MAX_ZOOM) - 1,
            y_min: 0,
            y_max: (1 << MAX_ZOOM) - 1,
        };
        assert_eq!(range.len(), 1u64 << (2 * MAX_ZOOM as u32));
        let first: Vec<_> = range.iter().take(3).collect();
        assert_eq!(first[2], TileCoord { zoom: MAX_ZOOM, x: 0, y: 2 });
    }

    #[test]
    fn test_relative_path() {
        let coord = TileCoord::new(12, 655, 1407).unwrap();
        assert_eq!(
            coord.relative_path("png"),
            PathBuf::from("12").join("655").join("1407.png")
        );
    }

    #[test]
    fn test_parse_bbox() {
        let bbox: BoundingBox = "-25.3, 41.9,-11.4,53.4".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-25.3, 41.9, -11.4, 53.4));
        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }
}
