//! Download job parameters.
//!
//! A [`DownloadJob`] is built once per run, either directly or from a YAML
//! [`JobConfig`], validated, and handed to the scheduler. Everything about it
//! is fixed for the run except the externally owned cancellation token.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tilegrab_tiles::{
    BoundingBox, HttpTileSource, UrlTemplate, DEFAULT_TILE_EXTENSION, DEFAULT_URL_TEMPLATE, DEFAULT_USER_AGENT,
    MAX_ZOOM,
};

/// Default tile directory.
pub const DEFAULT_TILE_DIR: &str = "map_tiles";

/// Default worker count.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Default outstanding-work multiple per worker.
pub const DEFAULT_IN_FLIGHT_FACTOR: usize = 4;

/// Default completions between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 25;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// One tile download run.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    /// Area to cover.
    pub bbox: BoundingBox,
    /// Zoom levels, processed in this order.
    pub zoom_levels: Vec<u8>,
    /// Root of the tile tree.
    pub tile_dir: PathBuf,
    /// Worker thread count.
    pub max_workers: usize,
    /// `User-Agent` header for every request.
    pub user_agent: String,
    /// Tile URL with `{z}`, `{x}`, `{y}` placeholders.
    pub url_template: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// At most `max_workers * in_flight_factor` tiles are outstanding.
    pub in_flight_factor: usize,
    /// Completions between progress callbacks.
    pub progress_interval: u64,
    /// Extension of tile files, without the dot.
    pub tile_extension: String,
}

impl DownloadJob {
    /// Create a job with default settings for everything but the area.
    pub fn new(bbox: BoundingBox, zoom_levels: Vec<u8>, tile_dir: impl Into<PathBuf>) -> Self {
        Self {
            bbox,
            zoom_levels,
            tile_dir: tile_dir.into(),
            max_workers: DEFAULT_MAX_WORKERS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            in_flight_factor: DEFAULT_IN_FLIGHT_FACTOR,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            tile_extension: DEFAULT_TILE_EXTENSION.to_string(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_url_template(mut self, url_template: impl Into<String>) -> Self {
        self.url_template = url_template.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_in_flight_factor(mut self, factor: usize) -> Self {
        self.in_flight_factor = factor;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_tile_extension(mut self, extension: impl Into<String>) -> Self {
        self.tile_extension = extension.into();
        self
    }

    /// Upper bound on tiles dispatched but not yet completed.
    pub fn max_outstanding(&self) -> usize {
        self.max_workers.saturating_mul(self.in_flight_factor).max(1)
    }

    /// Check every parameter. Called by the scheduler before any worker starts.
    pub fn validate(&self) -> Result<(), JobError> {
        if !self.bbox.is_finite() {
            return Err(JobError::Config(format!("bounding box {} has a non-finite coordinate", self.bbox)));
        }
        if self.zoom_levels.is_empty() {
            return Err(JobError::Config("no zoom levels selected".to_string()));
        }
        if let Some(&zoom) = self.zoom_levels.iter().find(|&&z| z > MAX_ZOOM) {
            return Err(tilegrab_tiles::TileError::InvalidZoomLevel(zoom).into());
        }
        if self.max_workers == 0 {
            return Err(JobError::Config("max_workers must be at least 1".to_string()));
        }
        if self.in_flight_factor == 0 {
            return Err(JobError::Config("in_flight_factor must be at least 1".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(JobError::Config("progress_interval must be at least 1".to_string()));
        }
        if self.user_agent.trim().is_empty() {
            return Err(JobError::Config("user_agent must not be empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(JobError::Config("timeout must be greater than zero".to_string()));
        }
        if self.tile_extension.trim_start_matches('.').is_empty() {
            return Err(JobError::Config("tile_extension must not be empty".to_string()));
        }
        UrlTemplate::parse(&self.url_template)?;
        Ok(())
    }

    /// HTTP tile source configured from this job.
    pub fn http_source(&self) -> Result<HttpTileSource, JobError> {
        let template = UrlTemplate::parse(&self.url_template)?;
        Ok(HttpTileSource::new(template)
            .with_user_agent(self.user_agent.clone())
            .with_timeout(self.timeout))
    }
}

// ============================================================================
// Job files
// ============================================================================

/// Zoom levels as written in a job file: `12`, `[10, 12]`, or `"6-14"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ZoomSelection {
    Single(u8),
    List(Vec<u8>),
    Spec(String),
}

impl ZoomSelection {
    /// Expand to an ordered list of zoom levels.
    pub fn to_levels(&self) -> Result<Vec<u8>, JobError> {
        match self {
            ZoomSelection::Single(zoom) => Ok(vec![*zoom]),
            ZoomSelection::List(levels) => Ok(levels.clone()),
            ZoomSelection::Spec(spec) => parse_zoom_spec(spec),
        }
    }
}

/// Job description loaded from YAML. Every field is optional so a file can
/// hold just the parts shared across runs; the CLI fills in the rest.
///
/// ```yaml
/// bbox: { min_lat: 47.5, min_lon: -122.5, max_lat: 47.7, max_lon: -122.2 }
/// zoom: "10-14"
/// tile_dir: seattle_tiles
/// max_workers: 16
/// url_template: "https://tiles.example.com/{z}/{x}/{y}.png"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobConfig {
    pub bbox: Option<BoundingBox>,
    pub zoom: Option<ZoomSelection>,
    pub tile_dir: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub user_agent: Option<String>,
    pub url_template: Option<String>,
    pub timeout_secs: Option<u64>,
    pub in_flight_factor: Option<usize>,
    pub progress_interval: Option<u64>,
    pub tile_extension: Option<String>,
}

impl JobConfig {
    /// Load a job file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, JobError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| JobError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Parse a job description from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, JobError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Fields set in `overrides` replace the ones in `self`.
    pub fn merged_with(self, overrides: JobConfig) -> JobConfig {
        JobConfig {
            bbox: overrides.bbox.or(self.bbox),
            zoom: overrides.zoom.or(self.zoom),
            tile_dir: overrides.tile_dir.or(self.tile_dir),
            max_workers: overrides.max_workers.or(self.max_workers),
            user_agent: overrides.user_agent.or(self.user_agent),
            url_template: overrides.url_template.or(self.url_template),
            timeout_secs: overrides.timeout_secs.or(self.timeout_secs),
            in_flight_factor: overrides.in_flight_factor.or(self.in_flight_factor),
            progress_interval: overrides.progress_interval.or(self.progress_interval),
            tile_extension: overrides.tile_extension.or(self.tile_extension),
        }
    }

    /// Build a job; `bbox` and `zoom` are required, everything else defaults.
    pub fn into_job(self) -> Result<DownloadJob, JobError> {
        let bbox = self
            .bbox
            .ok_or_else(|| JobError::Config("no bounding box given".to_string()))?;
        let zoom_levels = self
            .zoom
            .ok_or_else(|| JobError::Config("no zoom levels given".to_string()))?
            .to_levels()?;
        let tile_dir = self.tile_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_TILE_DIR));

        let mut job = DownloadJob::new(bbox, zoom_levels, tile_dir);
        if let Some(max_workers) = self.max_workers {
            job.max_workers = max_workers;
        }
        if let Some(user_agent) = self.user_agent {
            job.user_agent = user_agent;
        }
        if let Some(url_template) = self.url_template {
            job.url_template = url_template;
        }
        if let Some(secs) = self.timeout_secs {
            job.timeout = Duration::from_secs(secs);
        }
        if let Some(factor) = self.in_flight_factor {
            job.in_flight_factor = factor;
        }
        if let Some(interval) = self.progress_interval {
            job.progress_interval = interval;
        }
        if let Some(extension) = self.tile_extension {
            job.tile_extension = extension;
        }
        Ok(job)
    }
}

/// Parse a zoom selection such as `12`, `6-14`, or `6,8,10-12`.
///
/// Order is preserved and repeated levels are dropped after their first
/// appearance. Ranges must ascend.
pub fn parse_zoom_spec(spec: &str) -> Result<Vec<u8>, JobError> {
    let bad = |part: &str| JobError::Config(format!("invalid zoom selection '{}' in '{}'", part, spec));
    let parse_level = |part: &str| -> Result<u8, JobError> {
        let zoom: u8 = part.trim().parse().map_err(|_| bad(part))?;
        if zoom > MAX_ZOOM {
            return Err(tilegrab_tiles::TileError::InvalidZoomLevel(zoom).into());
        }
        Ok(zoom)
    };

    let mut levels = Vec::new();
    for part in spec.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(bad(part));
        }
        let expanded: Vec<u8> = match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_level(lo)?, parse_level(hi)?);
                if lo > hi {
                    return Err(bad(part));
                }
                (lo..=hi).collect()
            }
            None => vec![parse_level(part)?],
        };
        for zoom in expanded {
            if !levels.contains(&zoom) {
                levels.push(zoom);
            }
        }
    }
    Ok(levels)
}
