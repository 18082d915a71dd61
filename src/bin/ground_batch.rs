//! ground_batch - run grounding over every video in a directory
//!
//! For each `*.mp4` (sorted by name) whose numeric key appears in the
//! manifest: refine the query, localize the target across the task's frame
//! window, score against ground truth, and write `<key>_result.json` to the
//! output directory. Failing videos are logged and skipped; a missing video
//! directory or manifest stops the run before any work starts.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use video_grounding::storage::SUMMARY_FILE;
use video_grounding::{
    discover_videos, BatchConfig, BatchOrchestrator, CancelToken, JsonDirResultStore, Manifest,
    VideoReport,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory containing the input videos.
    #[arg(long, default_value = "sample_videos")]
    videos_dir: PathBuf,
    /// Task manifest (JSON keyed by video id).
    #[arg(long, default_value = "sample_video.json")]
    manifest: PathBuf,
    /// API key for the chat refiner. Without it queries are used verbatim.
    #[arg(long, env = "GROUNDING_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Directory for per-video results and the batch summary.
    #[arg(long, default_value = "output_batch")]
    output_dir: PathBuf,
    /// Write annotated frames next to the results.
    #[arg(long)]
    visualize: bool,
    /// Concurrent videos (overrides GROUNDING_WORKERS).
    #[arg(long)]
    workers: Option<usize>,
    /// Detector backend name (overrides GROUNDING_DETECTOR).
    #[arg(long)]
    detector: Option<String>,
    /// Tracker backend name (overrides GROUNDING_TRACKER).
    #[arg(long)]
    tracker: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = BatchConfig::load()?;
    if let Some(workers) = args.workers {
        config.workers = workers.max(1);
    }
    if let Some(detector) = &args.detector {
        config.detector.backend = detector.clone();
    }
    if let Some(tracker) = &args.tracker {
        config.tracker.backend = tracker.clone();
    }

    let (manifest, videos) = {
        let _stage = ui.stage("load manifest + discover videos");
        let manifest = Manifest::load(&args.manifest)
            .with_context(|| format!("load manifest {}", args.manifest.display()))?;
        let videos = discover_videos(&args.videos_dir)?;
        (manifest, videos)
    };
    log::info!(
        "{} manifest entries, {} videos in {}",
        manifest.len(),
        videos.len(),
        args.videos_dir.display()
    );

    let mut caps = config.capabilities(args.api_key.as_deref())?;
    if args.visualize {
        caps.visualizer = visualizer();
    }
    let store = Arc::new(JsonDirResultStore::open(&args.output_dir)?);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, finishing current frames and stopping");
        handler_token.cancel();
    })
    .context("install Ctrl-C handler")?;

    let orchestrator = BatchOrchestrator::new(
        Arc::new(manifest),
        caps,
        store,
        config.batch_options(),
    )
    .with_cancel_token(cancel)
    .with_visual_output(&args.output_dir);

    let progress = ui.progress("ground videos", videos.len() as u64);
    let summary = orchestrator.run_with_progress(&videos, &|report: &VideoReport| {
        progress.tick(&report.to_string());
    })?;
    progress.finish();

    println!(
        "done: {} videos attempted, {} completed, {} skipped, mean IoU {:.4}",
        summary.attempted, summary.completed, summary.skipped, summary.mean_average_iou
    );
    println!(
        "results in {} (summary: {})",
        args.output_dir.display(),
        args.output_dir.join(SUMMARY_FILE).display()
    );
    Ok(())
}

#[cfg(feature = "visualize")]
fn visualizer() -> Option<Arc<dyn video_grounding::visualize::Visualizer>> {
    Some(Arc::new(video_grounding::visualize::FrameOverlayWriter))
}

#[cfg(not(feature = "visualize"))]
fn visualizer() -> Option<Arc<dyn video_grounding::visualize::Visualizer>> {
    log::warn!("built without the visualize feature; --visualize ignored");
    None
}
