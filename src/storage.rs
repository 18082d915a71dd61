use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::batch::BatchSummary;
use crate::result::VideoResult;

pub const SUMMARY_FILE: &str = "batch_summary.json";
const RESULT_SUFFIX: &str = "_result.json";

/// Terminal storage for per-video results. Shared by all batch workers.
pub trait ResultStore: Send + Sync {
    fn persist(&self, video_id: &str, result: &VideoResult) -> Result<()>;

    fn load(&self, video_id: &str) -> Result<Option<VideoResult>>;

    fn persist_summary(&self, summary: &BatchSummary) -> Result<()>;
}

/// One `<video_id>_result.json` per video, each holding `{video_id: result}`.
pub struct JsonDirResultStore {
    dir: PathBuf,
}

impl JsonDirResultStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("create output directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{video_id}{RESULT_SUFFIX}"))
    }
}

impl ResultStore for JsonDirResultStore {
    fn persist(&self, video_id: &str, result: &VideoResult) -> Result<()> {
        let mut doc = BTreeMap::new();
        doc.insert(video_id, result);
        write_json_atomic(&self.path_for(video_id), &doc)
    }

    fn load(&self, video_id: &str) -> Result<Option<VideoResult>> {
        let path = self.path_for(video_id);
        if !path.exists() {
            return Ok(None);
        }
        let mut doc = read_result_file(&path)?;
        Ok(doc.remove(video_id))
    }

    fn persist_summary(&self, summary: &BatchSummary) -> Result<()> {
        write_json_atomic(&self.dir.join(SUMMARY_FILE), summary)
    }
}

/// Serialize to `<path>.tmp`, then rename over `path`.
pub fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid output path {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Parse one result file (`{video_id: result, ...}`).
pub fn read_result_file(path: &Path) -> Result<BTreeMap<String, VideoResult>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

/// Every `*_result.json` in `dir`, sorted by file name.
pub fn list_result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))? {
        let path = entry?.path();
        let is_result = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(RESULT_SUFFIX) && !n.starts_with('.'))
            .unwrap_or(false);
        if is_result && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Default)]
pub struct InMemoryResultStore {
    results: Mutex<BTreeMap<String, VideoResult>>,
    summary: Mutex<Option<BatchSummary>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video_ids(&self) -> Vec<String> {
        self.results
            .lock()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        self.summary.lock().ok().and_then(|s| s.clone())
    }
}

impl ResultStore for InMemoryResultStore {
    fn persist(&self, video_id: &str, result: &VideoResult) -> Result<()> {
        let mut results = self
            .results
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?;
        results.insert(video_id.to_string(), result.clone());
        Ok(())
    }

    fn load(&self, video_id: &str) -> Result<Option<VideoResult>> {
        let results = self
            .results
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?;
        Ok(results.get(video_id).cloned())
    }

    fn persist_summary(&self, summary: &BatchSummary) -> Result<()> {
        let mut slot = self
            .summary
            .lock()
            .map_err(|_| anyhow!("result store lock poisoned"))?;
        *slot = Some(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BoundingBox;
    use crate::localize::FrameTrack;

    fn sample() -> VideoResult {
        let bbox = BoundingBox::new(1, 2, 3, 4).unwrap();
        VideoResult::new("q", "p", FrameTrack::from_boxes(5, vec![Some(bbox), None]))
    }

    #[test]
    fn json_dir_store_round_trips_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDirResultStore::open(dir.path().join("out")).unwrap();
        store.persist("32", &sample()).unwrap();

        let path = store.path_for("32");
        assert!(path.ends_with("32_result.json"));
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("32").is_some());

        assert_eq!(store.load("32").unwrap(), Some(sample()));
        assert_eq!(store.load("33").unwrap(), None);
        assert_eq!(list_result_files(store.dir()).unwrap(), vec![path]);
    }

    #[test]
    fn in_memory_store_keeps_results() {
        let store = InMemoryResultStore::new();
        store.persist("7", &sample()).unwrap();
        assert_eq!(store.video_ids(), vec!["7".to_string()]);
        assert!(store.load("7").unwrap().is_some());
        assert!(store.summary().is_none());
    }
}
