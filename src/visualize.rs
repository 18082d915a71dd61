//! Annotated frame output.
//!
//! Runs after a video's result is persisted, on its own thread. Errors are
//! logged by the caller and never touch the stored numbers.

use anyhow::Result;
use std::path::PathBuf;

use crate::bbox::BoundingBox;
use crate::ingest::FrameSource;
use crate::result::PredictionMap;

/// Everything needed to annotate one video, owned so it can move to a
/// detached thread.
#[derive(Clone, Debug)]
pub struct OverlayJob {
    pub video_id: String,
    pub begin: u32,
    pub predictions: PredictionMap,
    /// Dense, aligned to `begin`.
    pub ground_truth: Vec<Option<BoundingBox>>,
    pub output_dir: PathBuf,
}

impl OverlayJob {
    pub fn ground_truth_at(&self, frame: u32) -> Option<&BoundingBox> {
        let offset = frame.checked_sub(self.begin)? as usize;
        self.ground_truth.get(offset)?.as_ref()
    }

    /// `<output>/<video_id>_annotated`
    pub fn frames_dir(&self) -> PathBuf {
        self.output_dir.join(format!("{}_annotated", self.video_id))
    }
}

pub trait Visualizer: Send + Sync {
    /// Annotate every frame `source` yields. Returns the number written.
    fn render(&self, job: &OverlayJob, source: &mut dyn FrameSource) -> Result<usize>;
}

#[cfg(feature = "visualize")]
pub use overlay::FrameOverlayWriter;

#[cfg(feature = "visualize")]
mod overlay {
    use anyhow::{anyhow, Context, Result};
    use image::{ImageBuffer, Rgb, RgbImage};
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    use super::{OverlayJob, Visualizer};
    use crate::bbox::BoundingBox;
    use crate::ingest::FrameSource;

    const PREDICTION: Rgb<u8> = Rgb([0, 255, 0]);
    const GROUND_TRUTH: Rgb<u8> = Rgb([255, 0, 0]);

    /// Writes `<frame>.jpg` with the prediction in green and ground truth in red.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct FrameOverlayWriter;

    fn draw(img: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
        if bbox.width() <= 0 || bbox.height() <= 0 {
            return;
        }
        let rect = Rect::at(bbox.xmin(), bbox.ymin()).of_size(bbox.width() as u32, bbox.height() as u32);
        draw_hollow_rect_mut(img, rect, color);
    }

    impl Visualizer for FrameOverlayWriter {
        fn render(&self, job: &OverlayJob, source: &mut dyn FrameSource) -> Result<usize> {
            let dir = job.frames_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create {}", dir.display()))?;

            let mut written = 0;
            while let Some(frame) = source.next_frame()? {
                let index = frame.index();
                let (w, h) = (frame.width(), frame.height());
                let mut img: RgbImage = ImageBuffer::from_raw(w, h, frame.into_pixels())
                    .ok_or_else(|| anyhow!("frame {} buffer does not match {}x{}", index, w, h))?;
                if let Some(truth) = job.ground_truth_at(index) {
                    draw(&mut img, truth, GROUND_TRUTH);
                }
                if let Some(pred) = job.predictions.get(index) {
                    draw(&mut img, pred, PREDICTION);
                }
                let path = dir.join(format!("{index}.jpg"));
                img.save(&path)
                    .with_context(|| format!("write {}", path.display()))?;
                written += 1;
            }
            Ok(written)
        }
    }
}
