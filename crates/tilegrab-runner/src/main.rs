//! `tilegrab`: download slippy-map tiles for offline use.
//!
//! ```text
//! tilegrab estimate --bbox 47.5,-122.5,47.7,-122.2 --zoom 10-14
//! tilegrab download --bbox 47.5,-122.5,47.7,-122.2 --zoom 10-14 --workers 8 --tile-dir seattle
//! tilegrab download --config job.yaml --yes --json
//! ```

use clap::{ArgAction, Args, Parser, Subcommand};
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tilegrab_runner::{
    describe_metrics, CancellationToken, DownloadJob, DownloadScheduler, JobConfig, JobStatus, ProgressUpdate,
    ZoomSelection,
};
use tilegrab_tiles::{BoundingBox, PreflightEstimator, DEFAULT_AVG_TILE_KB};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilegrab", author, version, about = "Download slippy-map tiles for offline use", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// More log output (-v debug, -vv trace); overrides RUST_LOG
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count the tiles an area needs and estimate their disk usage
    Estimate(EstimateArgs),
    /// Download the tiles covering an area
    Download(DownloadArgs),
}

#[derive(Args)]
struct AreaArgs {
    /// Bounding box in degrees
    #[arg(long, value_name = "MINLAT,MINLON,MAXLAT,MAXLON", allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,

    /// Zoom levels: N, A-B, or a comma list such as 6,8,10-12
    #[arg(short, long, value_name = "ZOOMS")]
    zoom: Option<String>,

    /// YAML job file; flags given on the command line take precedence
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl AreaArgs {
    fn base_config(&self) -> Result<JobConfig, Box<dyn Error>> {
        let file = match &self.config {
            Some(path) => JobConfig::from_file(path)?,
            None => JobConfig::default(),
        };
        let overrides = JobConfig {
            bbox: self.bbox,
            zoom: self.zoom.clone().map(ZoomSelection::Spec),
            ..JobConfig::default()
        };
        Ok(file.merged_with(overrides))
    }
}

#[derive(Args)]
struct EstimateArgs {
    #[command(flatten)]
    area: AreaArgs,

    /// Assumed average tile size in KiB
    #[arg(long, value_name = "KB", default_value_t = DEFAULT_AVG_TILE_KB)]
    avg_tile_kb: u64,
}

#[derive(Args)]
struct DownloadArgs {
    #[command(flatten)]
    area: AreaArgs,

    /// Number of parallel downloads
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Directory to store tiles in [default: map_tiles]
    #[arg(short, long, value_name = "DIR")]
    tile_dir: Option<PathBuf>,

    /// Tile URL with {z}, {x} and {y} placeholders
    #[arg(long, value_name = "URL")]
    url_template: Option<String>,

    /// User-Agent header; tile servers usually require one that identifies you
    #[arg(long, value_name = "UA")]
    user_agent: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Estimate(args) => run_estimate(args),
        Commands::Download(args) => run_download(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_estimate(args: EstimateArgs) -> Result<ExitCode, Box<dyn Error>> {
    let job = args.area.base_config()?.into_job()?;
    job.validate()?;

    let preflight = PreflightEstimator::with_avg_tile_kb(args.avg_tile_kb).estimate(&job.bbox, &job.zoom_levels)?;
    println!("Area: {}", job.bbox);
    println!("{}", preflight);
    Ok(ExitCode::SUCCESS)
}

fn run_download(args: DownloadArgs) -> Result<ExitCode, Box<dyn Error>> {
    let overrides = JobConfig {
        tile_dir: args.tile_dir.clone(),
        max_workers: args.workers,
        user_agent: args.user_agent.clone(),
        url_template: args.url_template.clone(),
        timeout_secs: args.timeout_secs,
        ..JobConfig::default()
    };
    let job = args.area.base_config()?.merged_with(overrides).into_job()?;
    job.validate()?;

    let preflight = PreflightEstimator::default().estimate(&job.bbox, &job.zoom_levels)?;
    eprintln!("Area: {}", job.bbox);
    eprintln!("{}", preflight);
    eprintln!("Saving to: {}", job.tile_dir.display());

    if !args.yes && !confirm("Start download?")? {
        eprintln!("Aborted.");
        return Ok(ExitCode::SUCCESS);
    }

    describe_metrics();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if !handler_token.is_cancelled() {
            eprintln!("\nStopping after in-flight tiles finish...");
        }
        handler_token.cancel();
    })
    .map_err(|e| format!("Failed to set Ctrl-C handler: {}", e))?;

    let report = download(job, cancel)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(match report.status {
        JobStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::SUCCESS,
    })
}

fn download(job: DownloadJob, cancel: CancellationToken) -> Result<tilegrab_runner::JobReport, Box<dyn Error>> {
    info!("Using tile server {}", job.url_template);
    let mut scheduler = DownloadScheduler::http(job, cancel)?;
    let report = scheduler.run(render_progress)?;
    eprintln!();
    Ok(report)
}

fn render_progress(update: &ProgressUpdate) {
    eprint!("\r  {}        ", update);
    if update.completed == update.total_for_zoom {
        eprintln!();
    }
    let _ = io::stderr().flush();
}

fn confirm(prompt: &str) -> io::Result<bool> {
    eprint!("{} [y/N] ", prompt);
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
