//! # tilegrab-tiles
//!
//! Building blocks for downloading slippy-map raster tiles for offline use.
//!
//! ## Overview
//!
//! - [`coord`]: tile math. Converts latitude/longitude to tile indices,
//!   enumerates the tiles covering a bounding box, counts tiles per zoom.
//! - [`TileStore`]: the `{zoom}/{x}/{y}.png` directory tree that doubles as
//!   the download cache.
//! - [`TileSource`] / [`TileFetcher`]: where tile bytes come from. The
//!   [`HttpTileSource`] fetches from any server with a `{z}/{x}/{y}` URL
//!   template.
//! - [`PreflightEstimator`]: tile counts and a rough disk estimate before
//!   anything is downloaded.
//!
//! The concurrent download engine lives in `tilegrab-runner`.
//!
//! ## Example
//!
//! ```no_run
//! use tilegrab_tiles::{BoundingBox, PreflightEstimator, TileStore, TileSource, TileFetcher, HttpTileSource};
//!
//! let bbox: BoundingBox = "47.5,-122.5,47.7,-122.2".parse()?;
//! let preflight = PreflightEstimator::default().estimate(&bbox, &[10, 11, 12])?;
//! println!("{}", preflight);
//!
//! let store = TileStore::open("map_tiles")?;
//! let mut fetcher = HttpTileSource::default().connect()?;
//! for coord in &tilegrab_tiles::tile_range_for_bbox(&bbox, 10)? {
//!     if !store.exists(&coord) {
//!         if let Ok(bytes) = fetcher.fetch(&coord) {
//!             store.write(&coord, &bytes)?;
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod coord;
mod error;
mod estimate;
mod fetch;
mod store;

pub use coord::{
    estimate_tile_count, grid_size, lat_lon_to_tile, tile_range_for_bbox, BoundingBox, TileCoord, TileRange,
    TileRangeIter, MAX_LATITUDE, MAX_ZOOM,
};
pub use error::{FetchError, TileError};
pub use estimate::{Preflight, PreflightEstimator, DEFAULT_AVG_TILE_KB};
pub use fetch::{
    HttpTileFetcher, HttpTileSource, TileFetcher, TileSource, UrlTemplate, DEFAULT_TIMEOUT, DEFAULT_URL_TEMPLATE,
    DEFAULT_USER_AGENT,
};
pub use store::{TileStore, DEFAULT_TILE_EXTENSION};

/// Result type for tile operations.
pub type Result<T> = std::result::Result<T, TileError>;
