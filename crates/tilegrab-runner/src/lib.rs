//! # tilegrab-runner
//!
//! Concurrent download engine for slippy-map tiles, and the `tilegrab` CLI.
//!
//! A run looks like this:
//!
//! 1. Describe the job with a [`DownloadJob`] (or load a [`JobConfig`] from YAML).
//! 2. Show the user a [`Preflight`](tilegrab_tiles::Preflight) estimate and ask for confirmation.
//! 3. Hand the job to a [`DownloadScheduler`] and run it with a progress callback.
//! 4. Inspect the returned [`JobReport`].
//!
//! ```no_run
//! use tilegrab_runner::{CancellationToken, DownloadJob, DownloadScheduler};
//! use tilegrab_tiles::BoundingBox;
//!
//! let job = DownloadJob::new(BoundingBox::new(47.5, -122.5, 47.7, -122.2), vec![10, 11, 12], "map_tiles")
//!     .with_max_workers(8)
//!     .with_user_agent("MyOfflineMaps/1.0 (me@example.com)");
//!
//! let cancel = CancellationToken::new();
//! let mut scheduler = DownloadScheduler::http(job, cancel.clone())?;
//! let report = scheduler.run(|p| eprintln!("{}", p))?;
//! println!("{}", report);
//! # Ok::<(), tilegrab_runner::JobError>(())
//! ```

pub mod cancel;
pub mod error;
pub mod job;
pub mod report;
pub mod scheduler;
pub mod telemetry;

pub use cancel::CancellationToken;
pub use error::JobError;
pub use job::{parse_zoom_spec, DownloadJob, JobConfig, ZoomSelection};
pub use report::{JobReport, ZoomReport};
pub use scheduler::{DownloadScheduler, DownloadStats, FetchOutcome, JobStatus, ProgressUpdate};
pub use telemetry::describe_metrics;
