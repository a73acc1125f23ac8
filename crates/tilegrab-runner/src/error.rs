//! Errors raised before or around a download job.
//!
//! Per-tile failures are not errors at this level; they are counted in
//! [`DownloadStats`](crate::DownloadStats) and the job carries on.

use std::path::PathBuf;
use thiserror::Error;
use tilegrab_tiles::TileError;

/// Errors that stop a job from starting, or from finishing its setup.
#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid job parameters.
    #[error("Invalid job configuration: {0}")]
    Config(String),

    /// Tile math, storage, or HTTP client setup failed.
    #[error(transparent)]
    Tiles(#[from] TileError),

    /// A job file could not be read.
    #[error("Cannot read job file {}: {source}", .path.display())]
    ConfigFile {
        /// Path of the job file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A job file is not valid YAML for a job.
    #[error("Invalid job file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A worker thread could not be started.
    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    /// Every worker exited while tiles were still outstanding.
    #[error("All worker threads exited with {0} tiles outstanding")]
    WorkersExited(usize),
}
