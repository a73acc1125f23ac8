//! Final job report.

use crate::scheduler::{DownloadStats, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Outcome of one zoom level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoomReport {
    pub zoom: u8,
    #[serde(flatten)]
    pub stats: DownloadStats,
    pub elapsed_secs: f64,
}

impl ZoomReport {
    pub fn new(zoom: u8, stats: DownloadStats, elapsed: Duration) -> Self {
        Self {
            zoom,
            stats,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    /// True if every tile in the range was downloaded or already cached.
    pub fn is_complete(&self) -> bool {
        self.stats.downloaded + self.stats.skipped == self.stats.total_for_zoom
    }
}

/// Outcome of a whole job.
///
/// Zoom levels that never started (after a cancellation) are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub status: JobStatus,
    pub zooms: Vec<ZoomReport>,
    pub elapsed_secs: f64,
}

impl JobReport {
    pub fn new(status: JobStatus, zooms: Vec<ZoomReport>, elapsed: Duration) -> Self {
        Self {
            status,
            zooms,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    /// Counters summed over every zoom level in the report.
    pub fn totals(&self) -> DownloadStats {
        self.zooms.iter().fold(DownloadStats::default(), |mut acc, z| {
            acc.downloaded += z.stats.downloaded;
            acc.skipped += z.stats.skipped;
            acc.failed += z.stats.failed;
            acc.cancelled += z.stats.cancelled;
            acc.total_for_zoom += z.stats.total_for_zoom;
            acc.bytes += z.stats.bytes;
            acc
        })
    }

    /// Stats for one zoom level, if it ran.
    pub fn zoom(&self, zoom: u8) -> Option<&ZoomReport> {
        self.zooms.iter().find(|z| z.zoom == zoom)
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for z in &self.zooms {
            writeln!(
                f,
                "  z{}: {}/{} downloaded, {} cached, {} failed ({:.1}s)",
                z.zoom, z.stats.downloaded, z.stats.total_for_zoom, z.stats.skipped, z.stats.failed, z.elapsed_secs
            )?;
        }
        let totals = self.totals();
        write!(
            f,
            "Download {}: {} downloaded ({:.1} MB), {} cached, {} failed in {:.1}s",
            self.status,
            totals.downloaded,
            totals.bytes as f64 / (1024.0 * 1024.0),
            totals.skipped,
            totals.failed,
            self.elapsed_secs
        )
    }
}
