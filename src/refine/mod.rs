//! Query refinement: complex question to short referring phrase.
//!
//! A refiner runs once per video before localization. It is slow and
//! remote, so calls go through `refine_with_timeout`, which turns every
//! failure mode into a `RefineOutcome` value. The orchestrator skips the
//! video unless the outcome is a usable phrase.

#[cfg(feature = "refine-api")]
mod chat;
mod passthrough;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

#[cfg(feature = "refine-api")]
pub use chat::{ChatRefiner, ChatRefinerConfig, DEFAULT_BASE_URL};
pub use passthrough::PassthroughRefiner;

pub trait QueryRefiner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn `query` about the video at `video` into a referring phrase.
    fn refine(&self, video: &Path, query: &str) -> Result<String>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefineOutcome {
    Phrase(String),
    /// The refiner answered with nothing usable.
    Empty,
    Failed(String),
    TimedOut,
}

impl RefineOutcome {
    pub fn phrase(&self) -> Option<&str> {
        match self {
            RefineOutcome::Phrase(p) => Some(p),
            _ => None,
        }
    }
}

/// Strip whitespace and quote characters from a model answer.
pub fn clean_phrase(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != '\'' && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Run `refiner` on a helper thread and wait at most `timeout`.
///
/// A call that outlives the timeout keeps running detached; its answer is
/// dropped.
pub fn refine_with_timeout(
    refiner: Arc<dyn QueryRefiner>,
    video: &Path,
    query: &str,
    timeout: Duration,
) -> RefineOutcome {
    let (tx, rx) = mpsc::channel();
    let video: PathBuf = video.to_path_buf();
    let query = query.to_string();
    let name = refiner.name();

    let spawned = thread::Builder::new()
        .name(format!("refiner-{name}"))
        .spawn(move || {
            let _ = tx.send(refiner.refine(&video, &query));
        });
    if let Err(e) = spawned {
        return RefineOutcome::Failed(format!("spawn refiner thread: {e}"));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(raw)) => {
            let phrase = clean_phrase(&raw);
            if phrase.is_empty() {
                RefineOutcome::Empty
            } else {
                RefineOutcome::Phrase(phrase)
            }
        }
        Ok(Err(e)) => RefineOutcome::Failed(format!("{e:#}")),
        Err(RecvTimeoutError::Timeout) => RefineOutcome::TimedOut,
        Err(RecvTimeoutError::Disconnected) => {
            RefineOutcome::Failed(format!("refiner {name} exited without answering"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FixedRefiner {
        answer: Result<String, String>,
        delay: Duration,
    }

    impl QueryRefiner for FixedRefiner {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn refine(&self, _video: &Path, _query: &str) -> Result<String> {
            thread::sleep(self.delay);
            self.answer.clone().map_err(|e| anyhow!(e))
        }
    }

    fn run(answer: Result<&str, &str>, delay_ms: u64, timeout_ms: u64) -> RefineOutcome {
        let refiner = Arc::new(FixedRefiner {
            answer: answer.map(str::to_string).map_err(str::to_string),
            delay: Duration::from_millis(delay_ms),
        });
        refine_with_timeout(
            refiner,
            Path::new("video_1.mp4"),
            "who holds the cup?",
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn cleans_quotes_and_whitespace() {
        assert_eq!(clean_phrase("  'the man in the blue suit'\n"), "the man in the blue suit");
        assert_eq!(clean_phrase("\"\""), "");
    }

    #[test]
    fn maps_every_outcome() {
        assert_eq!(
            run(Ok("\"the red cup\""), 0, 2000),
            RefineOutcome::Phrase("the red cup".to_string())
        );
        assert_eq!(run(Ok(" '' "), 0, 2000), RefineOutcome::Empty);
        assert!(matches!(run(Err("quota"), 0, 2000), RefineOutcome::Failed(m) if m.contains("quota")));
        assert_eq!(run(Ok("late"), 300, 20), RefineOutcome::TimedOut);
    }
}
