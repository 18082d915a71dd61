//! score_results - re-score existing result files against a manifest
//!
//! Reads every `*_result.json` in a directory, recomputes `average_iou` and
//! `frame_by_frame_iou` from `pred_bboxs`, rewrites the files, and prints the
//! mean over all scored videos.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use video_grounding::storage::{list_result_files, read_result_file, write_json_atomic};
use video_grounding::Manifest;

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory holding `<key>_result.json` files.
    #[arg(long, default_value = "output_batch")]
    results_dir: PathBuf,
    /// Task manifest with ground truth.
    #[arg(long, default_value = "sample_video.json")]
    manifest: PathBuf,
    /// Print scores without rewriting the files.
    #[arg(long)]
    dry_run: bool,
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

    let manifest = Manifest::load(&args.manifest)
        .with_context(|| format!("load manifest {}", args.manifest.display()))?;
    let files = list_result_files(&args.results_dir)?;

    let progress = ui.progress("score results", files.len() as u64);
    let mut scores = Vec::new();
    for path in files {
        let mut doc = match read_result_file(&path) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("{:#}", e);
                progress.tick(&format!("{}: unreadable", path.display()));
                continue;
            }
        };
        for (video_id, result) in doc.iter_mut() {
            match manifest.task(video_id) {
                Ok(task) => {
                    let average = result.rescore(&task);
                    scores.push(average);
                    progress.tick(&format!(
                        "video {}: {} scored frames, average IoU {:.4}",
                        video_id,
                        result.frame_by_frame_iou.len(),
                        average
                    ));
                }
                Err(e) => {
                    log::warn!("video {}: not scored: {}", video_id, e);
                    progress.tick(&format!("video {}: not scored", video_id));
                }
            }
        }
        if !args.dry_run {
            write_json_atomic(&path, &doc)?;
        }
    }
    progress.finish();

    let mean = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    println!("{} videos scored, mean IoU {:.4}", scores.len(), mean);
    Ok(())
}
