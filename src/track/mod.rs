//! Single-object trackers.
//!
//! A tracker is initialized once with a frame and a center-form box, then
//! asked to follow the object through subsequent frames. `Ok(None)` from
//! `update` means the tracker lost the object; the localizer reacts by
//! re-detecting. Instances hold per-video state and are never shared.

mod stub;
mod template;

use anyhow::Result;

use crate::bbox::CenterBox;
use crate::frame::Frame;

pub use stub::{ScriptedTracker, TrackerCall};
pub use template::{TemplateTracker, TemplateTrackerConfig};

pub trait ObjectTracker: Send {
    /// Backend name for logs and registry lookups.
    fn name(&self) -> &'static str;

    /// Start tracking `bbox` in `frame`. Replaces any previous target.
    fn init(&mut self, frame: &Frame, bbox: CenterBox) -> Result<()>;

    /// Follow the target into `frame`.
    fn update(&mut self, frame: &Frame) -> Result<Option<CenterBox>>;
}
