//! Bounded-concurrency tile download scheduler.
//!
//! The scheduler walks the requested zoom levels in order. For each level it
//! enumerates the covering tiles lazily and feeds them to a fixed pool of
//! worker threads over a bounded channel, never holding more than
//! [`DownloadJob::max_outstanding`] tiles dispatched but unfinished. Memory
//! therefore stays flat no matter how many millions of tiles a level holds.
//!
//! ## Workers
//!
//! Each worker owns one fetcher, created on its first tile and reused for
//! every tile after that (including across zoom levels). For each tile the
//! worker checks the cancellation token, skips tiles already on disk,
//! fetches, writes, and sends the outcome back to the scheduler thread,
//! which is the only place [`DownloadStats`] is updated. A fetcher that
//! panics costs one failed tile and a fresh connect, not the worker.
//!
//! ## Cancellation
//!
//! The token is polled before every dispatch and again by the worker before
//! every fetch. Once it is seen the scheduler stops dispatching, lets
//! outstanding tiles drain, and finishes with [`JobStatus::Cancelled`]
//! without starting further zoom levels. Fetches already in progress run to
//! completion.

use crate::cancel::CancellationToken;
use crate::error::JobError;
use crate::job::DownloadJob;
use crate::report::{JobReport, ZoomReport};
use crate::telemetry::metric_defs;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;
use tilegrab_tiles::{tile_range_for_bbox, FetchError, HttpTileSource, TileCoord, TileFetcher, TileSource, TileStore};
use tracing::{debug, info, warn};

// ============================================================================
// Outcomes and counters
// ============================================================================

/// Result of processing one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Fetched and written; carries the byte count.
    Success(u64),
    /// Already on disk; nothing fetched.
    AlreadyCached,
    /// Server answered with a non-200 status.
    HttpError(u16),
    /// Network, timeout, or client construction failure. A fetcher that
    /// panicked is reported here too.
    TransportError(String),
    /// Dequeued after cancellation was requested; nothing fetched.
    Cancelled,
    /// Fetched but the file could not be written.
    WriteError(String),
}

impl FetchOutcome {
    /// Whether this outcome counts as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FetchOutcome::HttpError(_) | FetchOutcome::TransportError(_) | FetchOutcome::WriteError(_)
        )
    }

    fn failure_reason(&self) -> &'static str {
        match self {
            FetchOutcome::HttpError(_) => "http",
            FetchOutcome::TransportError(_) => "transport",
            FetchOutcome::WriteError(_) => "write",
            _ => "none",
        }
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Success(bytes) => write!(f, "downloaded {} bytes", bytes),
            FetchOutcome::AlreadyCached => f.write_str("already cached"),
            FetchOutcome::HttpError(code) => write!(f, "HTTP {}", code),
            FetchOutcome::TransportError(reason) => write!(f, "transport error: {}", reason),
            FetchOutcome::Cancelled => f.write_str("cancelled"),
            FetchOutcome::WriteError(reason) => write!(f, "write error: {}", reason),
        }
    }
}

/// Counters for the zoom level in progress. Reset at each zoom boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    /// Tiles fetched and written.
    pub downloaded: u64,
    /// Tiles already on disk.
    pub skipped: u64,
    /// Tiles that failed to fetch or write.
    pub failed: u64,
    /// Tiles dequeued after cancellation.
    pub cancelled: u64,
    /// Tiles in this zoom level's range.
    pub total_for_zoom: u64,
    /// Bytes written.
    pub bytes: u64,
}

impl DownloadStats {
    fn for_zoom(total_for_zoom: u64) -> Self {
        Self {
            total_for_zoom,
            ..Self::default()
        }
    }

    /// Tiles with a recorded outcome.
    pub fn completed(&self) -> u64 {
        self.downloaded + self.skipped + self.failed + self.cancelled
    }

    fn record(&mut self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Success(bytes) => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            FetchOutcome::AlreadyCached => self.skipped += 1,
            FetchOutcome::Cancelled => self.cancelled += 1,
            FetchOutcome::HttpError(_) | FetchOutcome::TransportError(_) | FetchOutcome::WriteError(_) => {
                self.failed += 1
            }
        }
    }
}

/// Progress snapshot handed to the progress callback.
///
/// The counters are taken at the same instant as `completed`, so
/// `downloaded + skipped + failed` never exceeds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    /// Position of this zoom level in the job, starting at 0.
    pub zoom_index: usize,
    /// Number of zoom levels in the job.
    pub zoom_count: usize,
    /// Zoom level being downloaded.
    pub zoom: u8,
    /// Tiles with a recorded outcome so far at this level.
    pub completed: u64,
    /// Tiles in this level's range.
    pub total_for_zoom: u64,
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl ProgressUpdate {
    fn new(zoom_index: usize, zoom_count: usize, zoom: u8, stats: &DownloadStats) -> Self {
        Self {
            zoom_index,
            zoom_count,
            zoom,
            completed: stats.completed(),
            total_for_zoom: stats.total_for_zoom,
            downloaded: stats.downloaded,
            skipped: stats.skipped,
            failed: stats.failed,
        }
    }

    /// Completed fraction of this zoom level, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        if self.total_for_zoom == 0 {
            return 1.0;
        }
        self.completed as f64 / self.total_for_zoom as f64
    }
}

impl fmt::Display for ProgressUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Zoom {} ({}/{}): {}/{} tiles ({:.1}%), {} new, {} cached, {} failed",
            self.zoom,
            self.zoom_index + 1,
            self.zoom_count,
            self.completed,
            self.total_for_zoom,
            self.fraction() * 100.0,
            self.downloaded,
            self.skipped,
            self.failed
        )
    }
}

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Idle => "idle",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

// ============================================================================
// Workers
// ============================================================================

/// State shared by every worker.
struct WorkerContext<'a, S: TileSource> {
    source: &'a S,
    store: &'a TileStore,
    cancel: &'a CancellationToken,
}

/// Emit metrics and a log line for one finished tile.
fn observe(coord: &TileCoord, outcome: &FetchOutcome) {
    match outcome {
        FetchOutcome::Success(bytes) => {
            metrics::counter!(metric_defs::TILES_DOWNLOADED.name).increment(1);
            metrics::counter!(metric_defs::BYTES_WRITTEN.name).increment(*bytes);
        }
        FetchOutcome::AlreadyCached => {
            metrics::counter!(metric_defs::TILES_SKIPPED.name).increment(1);
        }
        FetchOutcome::Cancelled => {}
        failure => {
            metrics::counter!(metric_defs::TILES_FAILED.name, "reason" => failure.failure_reason()).increment(1);
        }
    }

    debug!(tile = %coord, "{}", outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Run `f` with this worker's fetcher, connecting first if needed.
///
/// A failed connect leaves the slot empty so the next tile tries again.
fn with_fetcher<S, F>(source: &S, slot: &mut Option<S::Fetcher>, f: F) -> FetchOutcome
where
    S: TileSource,
    F: FnOnce(&mut S::Fetcher) -> FetchOutcome,
{
    if slot.is_none() {
        match source.connect() {
            Ok(fetcher) => *slot = Some(fetcher),
            Err(e) => {
                warn!("Failed to create tile fetcher: {}", e);
                return FetchOutcome::TransportError(e.to_string());
            }
        }
    }
    match slot.as_mut() {
        Some(fetcher) => f(fetcher),
        None => FetchOutcome::TransportError("tile fetcher unavailable".to_string()),
    }
}

fn process_tile<S: TileSource>(
    ctx: &WorkerContext<'_, S>,
    slot: &mut Option<S::Fetcher>,
    coord: &TileCoord,
) -> FetchOutcome {
    if ctx.cancel.is_cancelled() {
        return FetchOutcome::Cancelled;
    }
    if ctx.store.exists(coord) {
        return FetchOutcome::AlreadyCached;
    }

    with_fetcher(ctx.source, slot, |fetcher| match fetcher.fetch(coord) {
        Ok(bytes) => match ctx.store.write(coord, &bytes) {
            Ok(_) => FetchOutcome::Success(bytes.len() as u64),
            Err(e) => FetchOutcome::WriteError(e.to_string()),
        },
        Err(FetchError::Http(code)) => FetchOutcome::HttpError(code),
        Err(FetchError::Transport(reason)) => FetchOutcome::TransportError(reason),
    })
}

/// Main loop of a worker thread.
///
/// Processes tiles until the work channel closes. Every dequeued tile gets
/// exactly one outcome sent back, including tiles whose fetcher panicked;
/// the scheduler counts those to track the outstanding window.
fn worker_main<S: TileSource>(
    ctx: &WorkerContext<'_, S>,
    work_rx: Receiver<TileCoord>,
    done_tx: Sender<FetchOutcome>,
) {
    let mut fetcher: Option<S::Fetcher> = None;

    for coord in work_rx.iter() {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| process_tile(ctx, &mut fetcher, &coord))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                warn!(tile = %coord, "Tile fetcher panicked: {}", panic_message(payload.as_ref()));
                // The fetcher may be half-updated; connect afresh for the next tile
                fetcher = None;
                FetchOutcome::TransportError(format!("fetcher panicked: {}", panic_message(payload.as_ref())))
            }
        };
        observe(&coord, &outcome);
        if done_tx.send(outcome).is_err() {
            break; // Scheduler gone
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Downloads every tile of a [`DownloadJob`] from a [`TileSource`].
pub struct DownloadScheduler<S: TileSource> {
    job: DownloadJob,
    source: S,
    cancel: CancellationToken,
    status: JobStatus,
    stats: DownloadStats,
}

impl DownloadScheduler<HttpTileSource> {
    /// Scheduler that fetches over HTTP with the job's template, user agent and timeout.
    ///
    /// Builds one client up front so a client that cannot be configured fails
    /// here rather than on every tile.
    pub fn http(job: DownloadJob, cancel: CancellationToken) -> Result<Self, JobError> {
        job.validate()?;
        let source = job.http_source()?;
        source.connect()?;
        Self::new(job, source, cancel)
    }
}

impl<S: TileSource> DownloadScheduler<S> {
    /// Create a scheduler. The job is validated here.
    pub fn new(job: DownloadJob, source: S, cancel: CancellationToken) -> Result<Self, JobError> {
        job.validate()?;
        Ok(Self {
            job,
            source,
            cancel,
            status: JobStatus::Idle,
            stats: DownloadStats::default(),
        })
    }

    pub fn job(&self) -> &DownloadJob {
        &self.job
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Counters of the last zoom level the most recent run reached.
    pub fn stats(&self) -> DownloadStats {
        self.stats
    }

    /// Run the job to completion or cancellation.
    ///
    /// `progress` is called on the calling thread every
    /// `progress_interval` completions and once more after the last
    /// completion of each zoom level. Tile failures are counted, not
    /// returned. Invalid zoom levels and an uncreatable tile directory are
    /// reported before any worker starts.
    pub fn run<F>(&mut self, mut progress: F) -> Result<JobReport, JobError>
    where
        F: FnMut(&ProgressUpdate),
    {
        let started = Instant::now();

        let ranges = self
            .job
            .zoom_levels
            .iter()
            .map(|&zoom| tile_range_for_bbox(&self.job.bbox, zoom))
            .collect::<Result<Vec<_>, _>>()?;
        let store = TileStore::with_extension(&self.job.tile_dir, &self.job.tile_extension)?;

        info!(
            "Downloading {} zoom level(s) over {} into {} with {} worker(s)",
            ranges.len(),
            self.job.bbox,
            self.job.tile_dir.display(),
            self.job.max_workers
        );
        self.status = JobStatus::Running;

        let limit = self.job.max_outstanding();
        let (work_tx, work_rx) = crossbeam_channel::bounded::<TileCoord>(limit);
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<FetchOutcome>();

        let ctx = WorkerContext {
            source: &self.source,
            store: &store,
            cancel: &self.cancel,
        };
        let job = &self.job;

        let result: Result<(Vec<ZoomReport>, bool), JobError> = thread::scope(|scope| {
            for n in 0..job.max_workers {
                let ctx = &ctx;
                let work_rx = work_rx.clone();
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("tile-worker-{}", n))
                    .spawn_scoped(scope, move || worker_main(ctx, work_rx, done_tx))
                    .map_err(JobError::WorkerSpawn)?;
            }
            // Only workers hold these now, so a dead pool shows up as a disconnect
            drop(work_rx);
            drop(done_tx);

            let mut zooms = Vec::with_capacity(ranges.len());
            let mut cancelled = false;

            for (zoom_index, range) in ranges.iter().enumerate() {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let zoom_started = Instant::now();
                let total = range.len();
                let mut stats = DownloadStats::for_zoom(total);
                metrics::gauge!(metric_defs::ZOOM_CURRENT.name).set(f64::from(range.zoom));
                info!(
                    "Zoom {} ({}/{}): {} tiles, x {}..={}, y {}..={}",
                    range.zoom,
                    zoom_index + 1,
                    ranges.len(),
                    total,
                    range.x_min,
                    range.x_max,
                    range.y_min,
                    range.y_max
                );

                let mut tiles = range.iter();
                let mut outstanding = 0usize;
                let mut last_reported = 0u64;

                loop {
                    // Top up the window
                    while outstanding < limit && !cancelled {
                        if self.cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }
                        let Some(coord) = tiles.next() else { break };
                        if work_tx.send(coord).is_err() {
                            return Err(JobError::WorkersExited(outstanding));
                        }
                        outstanding += 1;
                    }

                    if outstanding == 0 {
                        break;
                    }

                    let Ok(outcome) = done_rx.recv() else {
                        return Err(JobError::WorkersExited(outstanding));
                    };
                    outstanding -= 1;
                    stats.record(&outcome);

                    let completed = stats.completed();
                    if completed % job.progress_interval == 0 || completed == total {
                        progress(&ProgressUpdate::new(zoom_index, ranges.len(), range.zoom, &stats));
                        last_reported = completed;
                    }
                }

                if stats.completed() > 0 && last_reported != stats.completed() {
                    progress(&ProgressUpdate::new(zoom_index, ranges.len(), range.zoom, &stats));
                }

                let elapsed = zoom_started.elapsed();
                info!(
                    "Zoom {} {}: {} downloaded, {} cached, {} failed in {:.1}s",
                    range.zoom,
                    if cancelled { "stopped" } else { "done" },
                    stats.downloaded,
                    stats.skipped,
                    stats.failed,
                    elapsed.as_secs_f64()
                );
                zooms.push(ZoomReport::new(range.zoom, stats, elapsed));

                if cancelled {
                    break;
                }
            }

            // Closing the work channel lets the workers exit before the scope joins them
            drop(work_tx);
            Ok((zooms, cancelled))
        });

        let (zooms, cancelled) = match result {
            Ok(done) => done,
            Err(e) => {
                self.status = JobStatus::Idle;
                return Err(e);
            }
        };

        if let Some(last) = zooms.last() {
            self.stats = last.stats;
        }
        self.status = if cancelled {
            info!("Download cancelled after {} zoom level(s)", zooms.len());
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };

        Ok(JobReport::new(self.status, zooms, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record() {
        let mut stats = DownloadStats::for_zoom(10);
        stats.record(&FetchOutcome::Success(100));
        stats.record(&FetchOutcome::Success(50));
        stats.record(&FetchOutcome::AlreadyCached);
        stats.record(&FetchOutcome::HttpError(404));
        stats.record(&FetchOutcome::TransportError("timeout".to_string()));
        stats.record(&FetchOutcome::WriteError("disk full".to_string()));
        stats.record(&FetchOutcome::Cancelled);

        assert_eq!(stats.downloaded, 2);
        assert_eq!(stats.bytes, 150);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.completed(), 7);
        assert_eq!(stats.total_for_zoom, 10);
    }

    #[test]
    fn test_outcome_failure() {
        assert!(FetchOutcome::HttpError(500).is_failure());
        assert!(FetchOutcome::WriteError(String::new()).is_failure());
        assert!(!FetchOutcome::AlreadyCached.is_failure());
        assert!(!FetchOutcome::Cancelled.is_failure());
        assert_eq!(FetchOutcome::TransportError(String::new()).failure_reason(), "transport");
    }

    #[test]
    fn test_progress_display() {
        let update = ProgressUpdate {
            zoom_index: 1,
            zoom_count: 3,
            zoom: 12,
            completed: 25,
            total_for_zoom: 100,
            downloaded: 20,
            skipped: 4,
            failed: 1,
        };
        assert_eq!(
            update.to_string(),
            "Zoom 12 (2/3): 25/100 tiles (25.0%), 20 new, 4 cached, 1 failed"
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Cancelled).unwrap(), "\"cancelled\"");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
    }
}
