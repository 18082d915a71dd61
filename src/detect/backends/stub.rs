use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bbox::CenterBox;
use crate::detect::backend::GroundingDetector;
use crate::frame::Frame;

/// What a scripted detector does for one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptedDetection {
    Found(CenterBox),
    NotFound,
    Error,
    /// Sleep before answering (exercise timeouts), then report the inner step.
    Delay(Duration, Box<ScriptedDetection>),
}

/// Stub backend for testing. Replays a per-frame script and records every
/// frame it was asked about.
pub struct ScriptedDetector {
    script: HashMap<u32, ScriptedDetection>,
    fallback: ScriptedDetection,
    calls: Arc<Mutex<Vec<u32>>>,
}

impl ScriptedDetector {
    pub fn new(fallback: ScriptedDetection) -> Self {
        Self {
            script: HashMap::new(),
            fallback,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on_frame(mut self, frame: u32, step: ScriptedDetection) -> Self {
        self.script.insert(frame, step);
        self
    }

    /// Shared log of frame indices passed to `detect`, in call order.
    pub fn call_log(&self) -> Arc<Mutex<Vec<u32>>> {
        Arc::clone(&self.calls)
    }

    fn play(step: &ScriptedDetection) -> Result<Option<CenterBox>> {
        match step {
            ScriptedDetection::Found(bbox) => Ok(Some(*bbox)),
            ScriptedDetection::NotFound => Ok(None),
            ScriptedDetection::Error => Err(anyhow!("scripted detector failure")),
            ScriptedDetection::Delay(delay, inner) => {
                std::thread::sleep(*delay);
                Self::play(inner)
            }
        }
    }
}

impl GroundingDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame, phrase: &str) -> Result<Option<CenterBox>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(frame.index());
        }
        if phrase.trim().is_empty() {
            return Ok(None);
        }
        let step = self.script.get(&frame.index()).unwrap_or(&self.fallback);
        Self::play(step)
    }
}
