//! Error types for the tiles crate.

use std::path::PathBuf;
use thiserror::Error;

use crate::coord::MAX_ZOOM;

/// Errors that can occur while setting up tile storage or fetching.
#[derive(Debug, Error)]
pub enum TileError {
    /// I/O error on the tile tree.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The root of the tile tree could not be created.
    #[error("Cannot create tile directory {}: {source}", .path.display())]
    CreateRoot {
        /// Requested root directory.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Zoom level outside the supported range.
    #[error("Invalid zoom level {0} (must be 0-{})", MAX_ZOOM)]
    InvalidZoomLevel(u8),

    /// Tile indices outside the grid for their zoom level.
    #[error("Tile {zoom}/{x}/{y} is outside the grid for zoom {zoom}")]
    OutOfGrid {
        /// Zoom level.
        zoom: u8,
        /// Column.
        x: u32,
        /// Row.
        y: u32,
    },

    /// URL template is missing a placeholder or is otherwise unusable.
    #[error("Invalid URL template '{template}': {reason}")]
    InvalidUrlTemplate {
        /// The template as supplied.
        template: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The HTTP client could not be configured.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Failure of a single tile fetch.
///
/// These are per-tile and never abort a job; the scheduler counts them as failed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server answered with something other than 200.
    #[error("HTTP status {0}")]
    Http(u16),

    /// Connection, DNS, timeout, or body read failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}
