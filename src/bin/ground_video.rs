//! ground_video - run grounding on a single video
//!
//! Accepts a local file or a `stub://<name>` synthetic video. The task is
//! looked up by the numeric key in the file name unless `--video-id` is
//! given. Writes a single result file.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use video_grounding::detect::DetectorSession;
use video_grounding::ingest::VideoOpener;
use video_grounding::refine::{refine_with_timeout, RefineOutcome};
use video_grounding::storage::write_json_atomic;
use video_grounding::{
    evaluate_video, video_key_from_path, BatchConfig, CancelToken, Localizer, Manifest,
    VideoResult,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file, or stub://<name> for a synthetic video.
    #[arg(long)]
    video_path: PathBuf,
    /// Task manifest (JSON keyed by video id).
    #[arg(long)]
    json_path: PathBuf,
    /// Manifest key; defaults to the first number in the file name.
    #[arg(long)]
    video_id: Option<String>,
    /// API key for the chat refiner. Without it the query is used verbatim.
    #[arg(long, env = "GROUNDING_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Output result file.
    #[arg(long, default_value = "output/results.json")]
    output_path: PathBuf,
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

    let config = BatchConfig::load()?;
    let manifest = Manifest::load(&args.json_path)
        .with_context(|| format!("load manifest {}", args.json_path.display()))?;
    let key = match args.video_id.clone() {
        Some(key) => key,
        None => video_key_from_path(&args.video_path).ok_or_else(|| {
            anyhow!(
                "no numeric video id in {}; pass --video-id",
                args.video_path.display()
            )
        })?,
    };
    let task = manifest.task(&key)?;
    log::info!(
        "video {}: frames {}-{}, query '{}'",
        key,
        task.window.begin(),
        task.window.end(),
        task.query
    );

    let caps = config.capabilities(args.api_key.as_deref())?;

    let phrase = {
        let _stage = ui.stage("refine query");
        match refine_with_timeout(
            Arc::clone(&caps.refiner),
            &args.video_path,
            &task.query,
            config.refine_timeout,
        ) {
            RefineOutcome::Phrase(phrase) => phrase,
            other => return Err(anyhow!("query refinement failed: {:?}", other)),
        }
    };
    log::info!("'{}' -> '{}'", task.query, phrase);

    let localization = {
        let _stage = ui.stage("localize");
        let mut source = caps.opener.open(&args.video_path, task.window)?;
        let session = DetectorSession::spawn((caps.detector)()?, config.detect_timeout)?;
        Localizer::new(session, (caps.tracker)()?)
            .run(source.as_mut(), task.window, &phrase, &CancelToken::new())?
    };

    let score = evaluate_video(&localization.track, &task);
    let found = localization.track.found_count();
    let frames = localization.track.len();
    let mut result = VideoResult::new(task.query.clone(), phrase, localization.track);
    result.attach_score(score);

    if let Some(parent) = args.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut doc = std::collections::BTreeMap::new();
    doc.insert(key.as_str(), &result);
    write_json_atomic(&args.output_path, &doc)?;

    println!(
        "video {}: {}/{} frames found, average IoU {:.4}; saved to {}",
        key,
        found,
        frames,
        result.average_iou,
        args.output_path.display()
    );
    Ok(())
}
