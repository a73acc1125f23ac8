//! Metric declarations for download jobs.
//!
//! Metrics go through the `metrics` facade. Nothing is recorded unless the
//! embedding application installs a recorder; call [`describe_metrics`] once
//! after installing it.

use metrics::{describe_counter, describe_gauge, Unit};

/// The kind of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
}

/// A metric declaration with its metadata.
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "tilegrab.tiles.downloaded").
    pub name: &'static str,
    /// Counter or gauge.
    pub kind: MetricKind,
    /// Human-readable description.
    pub description: &'static str,
    /// Unit of measurement.
    pub unit: Unit,
    /// Expected label keys.
    pub labels: &'static [&'static str],
}

impl Metric {
    const fn counter(name: &'static str, description: &'static str, unit: Unit) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            description,
            unit,
            labels: &[],
        }
    }

    const fn gauge(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            description,
            unit: Unit::Count,
            labels: &[],
        }
    }

    const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match self.kind {
            MetricKind::Counter => describe_counter!(self.name, self.unit, self.description),
            MetricKind::Gauge => describe_gauge!(self.name, self.unit, self.description),
        }
    }
}

/// All metric definitions.
pub mod metric_defs {
    use super::{Metric, Unit};

    /// Tiles fetched and written this process.
    pub const TILES_DOWNLOADED: Metric =
        Metric::counter("tilegrab.tiles.downloaded", "Tiles fetched and written to disk", Unit::Count);

    /// Tiles found already on disk.
    pub const TILES_SKIPPED: Metric =
        Metric::counter("tilegrab.tiles.skipped", "Tiles skipped because they were already cached", Unit::Count);

    /// Tiles that could not be fetched or written.
    ///
    /// Labels: reason (http, transport, write)
    pub const TILES_FAILED: Metric =
        Metric::counter("tilegrab.tiles.failed", "Tiles that failed to download", Unit::Count).with_labels(&["reason"]);

    /// Tile bytes written to disk.
    pub const BYTES_WRITTEN: Metric =
        Metric::counter("tilegrab.bytes.written", "Tile bytes written to disk", Unit::Bytes);

    /// Zoom level currently being downloaded.
    pub const ZOOM_CURRENT: Metric = Metric::gauge("tilegrab.zoom.current", "Zoom level currently being downloaded");

    /// Every metric, for registration.
    pub const ALL: &[Metric] = &[TILES_DOWNLOADED, TILES_SKIPPED, TILES_FAILED, BYTES_WRITTEN, ZOOM_CURRENT];
}

/// Register descriptions for all metrics.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}
