use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ObjectTracker;
use crate::bbox::CenterBox;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerCall {
    Init(u32),
    Update(u32),
}

/// Stub tracker for testing. `update` returns the scripted box for a frame
/// (default: the init box), or `None` for frames listed as lost.
pub struct ScriptedTracker {
    boxes: HashMap<u32, CenterBox>,
    lost: Vec<u32>,
    fail_init: bool,
    current: Option<CenterBox>,
    calls: Arc<Mutex<Vec<TrackerCall>>>,
}

impl ScriptedTracker {
    pub fn new() -> Self {
        Self {
            boxes: HashMap::new(),
            lost: Vec::new(),
            fail_init: false,
            current: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn on_frame(mut self, frame: u32, bbox: CenterBox) -> Self {
        self.boxes.insert(frame, bbox);
        self
    }

    pub fn lose_at(mut self, frame: u32) -> Self {
        self.lost.push(frame);
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn call_log(&self) -> Arc<Mutex<Vec<TrackerCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&self, call: TrackerCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl Default for ScriptedTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTracker for ScriptedTracker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn init(&mut self, frame: &Frame, bbox: CenterBox) -> Result<()> {
        self.record(TrackerCall::Init(frame.index()));
        if self.fail_init {
            self.current = None;
            return Err(anyhow!("scripted tracker init failure"));
        }
        self.current = Some(bbox);
        Ok(())
    }

    fn update(&mut self, frame: &Frame) -> Result<Option<CenterBox>> {
        self.record(TrackerCall::Update(frame.index()));
        let Some(current) = self.current else {
            return Err(anyhow!("tracker used before init"));
        };
        if self.lost.contains(&frame.index()) {
            return Ok(None);
        }
        Ok(Some(self.boxes.get(&frame.index()).copied().unwrap_or(current)))
    }
}
