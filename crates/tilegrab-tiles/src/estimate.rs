//! Preflight estimate of a download's size.

use crate::coord::{estimate_tile_count, BoundingBox};
use crate::Result;
use std::fmt;

/// Default average size of one raster tile, in KiB.
///
/// Very rough; real averages depend on the area and the map style.
pub const DEFAULT_AVG_TILE_KB: u64 = 20;

/// Estimates tile counts and disk footprint before a job starts.
#[derive(Debug, Clone, Copy)]
pub struct PreflightEstimator {
    avg_tile_bytes: u64,
}

impl Default for PreflightEstimator {
    fn default() -> Self {
        Self::with_avg_tile_kb(DEFAULT_AVG_TILE_KB)
    }
}

impl PreflightEstimator {
    /// Create an estimator assuming `avg_tile_kb` KiB per tile.
    pub fn with_avg_tile_kb(avg_tile_kb: u64) -> Self {
        Self {
            avg_tile_bytes: avg_tile_kb.saturating_mul(1024),
        }
    }

    /// Assumed bytes per tile.
    pub fn avg_tile_bytes(&self) -> u64 {
        self.avg_tile_bytes
    }

    /// Estimate the job that would download `zoom_levels` over `bbox`.
    ///
    /// Must be called with the same parameters later handed to the scheduler.
    pub fn estimate(&self, bbox: &BoundingBox, zoom_levels: &[u8]) -> Result<Preflight> {
        let (per_zoom, total_tiles) = estimate_tile_count(bbox, zoom_levels)?;
        Ok(Preflight {
            per_zoom,
            total_tiles,
            approx_bytes: total_tiles.saturating_mul(self.avg_tile_bytes),
            avg_tile_bytes: self.avg_tile_bytes,
        })
    }
}

/// Result of a preflight estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preflight {
    /// `(zoom, tiles)` for each requested zoom level, in request order.
    pub per_zoom: Vec<(u8, u64)>,
    /// Sum of all per-zoom counts.
    pub total_tiles: u64,
    /// `total_tiles` times the assumed tile size.
    pub approx_bytes: u64,
    /// Assumed bytes per tile.
    pub avg_tile_bytes: u64,
}

impl Preflight {
    /// Estimated footprint in GiB.
    pub fn approx_gib(&self) -> f64 {
        self.approx_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

impl fmt::Display for Preflight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total tiles: {}", group_thousands(self.total_tiles))?;
        writeln!(
            f,
            "Estimated disk: ~{:.2} GB (assuming {} KB/tile)",
            self.approx_gib(),
            self.avg_tile_bytes / 1024
        )?;
        writeln!(f)?;
        write!(f, "Per zoom:")?;
        for (zoom, count) in &self.per_zoom {
            write!(f, "\n  z{}: {} tiles", zoom, group_thousands(*count))?;
        }
        Ok(())
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
