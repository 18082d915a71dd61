use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::batch::{BatchOptions, Capabilities};
use crate::ingest::FileOpener;
use crate::refine::{PassthroughRefiner, QueryRefiner};
use crate::registry::{builtin_detectors, builtin_trackers, DetectorSettings};
use crate::track::TemplateTrackerConfig;
use std::sync::Arc;

const DEFAULT_WORKERS: usize = 1;
const DEFAULT_VIDEO_TIMEOUT_SECS: u64 = 300;
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFINE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DETECTOR: &str = "cpu";
const DEFAULT_TRACKER: &str = "template";
const DEFAULT_REFINER_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const DEFAULT_REFINER_MODEL: &str = "glm-4v";
const DEFAULT_REFINER_MAX_TOKENS: u32 = 20;
const DEFAULT_SEARCH_RADIUS: u32 = 24;
const DEFAULT_MAX_MAD: f32 = 40.0;

#[derive(Debug, Deserialize, Default)]
struct BatchConfigFile {
    workers: Option<usize>,
    timeouts: Option<TimeoutsConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    refiner: Option<RefinerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TimeoutsConfigFile {
    video_secs: Option<u64>,
    detect_ms: Option<u64>,
    refine_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    backend: Option<String>,
    search_radius: Option<u32>,
    max_mad: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct RefinerConfigFile {
    url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub workers: usize,
    pub video_timeout: Duration,
    pub detect_timeout: Duration,
    pub refine_timeout: Duration,
    pub detector: DetectorBackendSettings,
    pub tracker: TrackerSettings,
    pub refiner: RefinerSettings,
}

#[derive(Debug, Clone)]
pub struct DetectorBackendSettings {
    pub backend: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub backend: String,
    pub search_radius: u32,
    pub max_mad: f32,
}

#[derive(Debug, Clone)]
pub struct RefinerSettings {
    pub url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl BatchConfig {
    /// Defaults, then the JSON file named by `GROUNDING_CONFIG`, then
    /// `GROUNDING_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GROUNDING_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: BatchConfigFile) -> Self {
        let timeouts = file.timeouts.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let refiner = file.refiner.unwrap_or_default();
        Self {
            workers: file.workers.unwrap_or(DEFAULT_WORKERS),
            video_timeout: Duration::from_secs(
                timeouts.video_secs.unwrap_or(DEFAULT_VIDEO_TIMEOUT_SECS),
            ),
            detect_timeout: Duration::from_millis(
                timeouts.detect_ms.unwrap_or(DEFAULT_DETECT_TIMEOUT_MS),
            ),
            refine_timeout: Duration::from_secs(
                timeouts.refine_secs.unwrap_or(DEFAULT_REFINE_TIMEOUT_SECS),
            ),
            detector: DetectorBackendSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                endpoint: detector.endpoint,
            },
            tracker: TrackerSettings {
                backend: tracker
                    .backend
                    .unwrap_or_else(|| DEFAULT_TRACKER.to_string()),
                search_radius: tracker.search_radius.unwrap_or(DEFAULT_SEARCH_RADIUS),
                max_mad: tracker.max_mad.unwrap_or(DEFAULT_MAX_MAD),
            },
            refiner: RefinerSettings {
                url: refiner
                    .url
                    .unwrap_or_else(|| DEFAULT_REFINER_URL.to_string()),
                model: refiner
                    .model
                    .unwrap_or_else(|| DEFAULT_REFINER_MODEL.to_string()),
                max_tokens: refiner.max_tokens.unwrap_or(DEFAULT_REFINER_MAX_TOKENS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(workers) = env_parse::<usize>("GROUNDING_WORKERS", "an integer")? {
            self.workers = workers;
        }
        if let Some(secs) = env_parse::<u64>("GROUNDING_VIDEO_TIMEOUT_SECS", "an integer number of seconds")? {
            self.video_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("GROUNDING_DETECT_TIMEOUT_MS", "an integer number of milliseconds")? {
            self.detect_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = env_parse::<u64>("GROUNDING_REFINE_TIMEOUT_SECS", "an integer number of seconds")? {
            self.refine_timeout = Duration::from_secs(secs);
        }
        if let Some(backend) = env_string("GROUNDING_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(endpoint) = env_string("GROUNDING_DETECTOR_ENDPOINT") {
            self.detector.endpoint = Some(endpoint);
        }
        if let Some(backend) = env_string("GROUNDING_TRACKER") {
            self.tracker.backend = backend;
        }
        if let Some(url) = env_string("GROUNDING_REFINER_URL") {
            self.refiner.url = url;
        }
        if let Some(model) = env_string("GROUNDING_REFINER_MODEL") {
            self.refiner.model = model;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        for (name, value) in [
            ("video timeout", self.video_timeout),
            ("detector timeout", self.detect_timeout),
            ("refinement timeout", self.refine_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.refiner.max_tokens == 0 {
            return Err(anyhow!("refiner max_tokens must be greater than zero"));
        }
        if self.tracker.max_mad.is_nan() || self.tracker.max_mad <= 0.0 {
            return Err(anyhow!("tracker max_mad must be greater than zero"));
        }
        Ok(())
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            workers: self.workers,
            video_timeout: self.video_timeout,
            detect_timeout: self.detect_timeout,
            refine_timeout: self.refine_timeout,
        }
    }

    pub fn tracker_config(&self) -> TemplateTrackerConfig {
        TemplateTrackerConfig {
            search_radius: self.tracker.search_radius,
            max_mad: self.tracker.max_mad,
            ..TemplateTrackerConfig::default()
        }
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            endpoint: self.detector.endpoint.clone(),
            request_timeout: self.detect_timeout,
        }
    }
}

impl BatchConfig {
    /// Resolve the configured backends. Without an API key (or without the
    /// `refine-api` feature) the query is used as the phrase unchanged.
    pub fn capabilities(&self, api_key: Option<&str>) -> Result<Capabilities> {
        let detectors = builtin_detectors(&self.detector_settings());
        let trackers = builtin_trackers(self.tracker_config());
        Ok(Capabilities {
            refiner: self.refiner(api_key)?,
            detector: detectors.factory(&self.detector.backend)?,
            tracker: trackers.factory(&self.tracker.backend)?,
            opener: Arc::new(FileOpener::new()),
            visualizer: None,
        })
    }

    fn refiner(&self, api_key: Option<&str>) -> Result<Arc<dyn QueryRefiner>> {
        let api_key = api_key.map(str::trim).filter(|k| !k.is_empty());
        match api_key {
            #[cfg(feature = "refine-api")]
            Some(key) => {
                let refiner = crate::refine::ChatRefiner::new(crate::refine::ChatRefinerConfig {
                    base_url: self.refiner.url.clone(),
                    api_key: key.to_string(),
                    model: self.refiner.model.clone(),
                    max_tokens: self.refiner.max_tokens,
                    timeout: self.refine_timeout,
                })?;
                Ok(Arc::new(refiner))
            }
            #[cfg(not(feature = "refine-api"))]
            Some(_) => {
                log::warn!("built without refine-api; ignoring API key and using queries as phrases");
                Ok(Arc::new(PassthroughRefiner))
            }
            None => {
                log::warn!("no API key; using queries as phrases");
                Ok(Arc::new(PassthroughRefiner))
            }
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, what: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, what)),
        None => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<BatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
