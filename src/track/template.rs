//! Luma template tracker.
//!
//! Keeps a grayscale patch of the target and, for each new frame, searches a
//! square neighbourhood around the last position for the offset with the
//! lowest mean absolute difference. A match worse than `max_mad` counts as a
//! lost target. The template drifts slowly toward the latest match so gradual
//! appearance changes do not break the lock.

use anyhow::{anyhow, Result};

use super::ObjectTracker;
use crate::bbox::{BoundingBox, CenterBox};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct TemplateTrackerConfig {
    /// Max displacement searched per frame, in pixels.
    pub search_radius: u32,
    /// Mean absolute luma difference above which the target is lost.
    pub max_mad: f32,
    /// Sample every n-th template pixel in each direction.
    pub sample_stride: u32,
    /// Weight of the newest match when refreshing the template (0 disables).
    pub blend: f32,
}

impl Default for TemplateTrackerConfig {
    fn default() -> Self {
        Self {
            search_radius: 24,
            max_mad: 40.0,
            sample_stride: 2,
            blend: 0.1,
        }
    }
}

struct Target {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
    template: Vec<f32>,
    frame_size: (u32, u32),
}

pub struct TemplateTracker {
    config: TemplateTrackerConfig,
    target: Option<Target>,
}

impl TemplateTracker {
    pub fn new(config: TemplateTrackerConfig) -> Self {
        Self {
            config,
            target: None,
        }
    }

    fn stride(&self) -> u32 {
        self.config.sample_stride.max(1)
    }

    fn mad_at(&self, frame: &Frame, target: &Target, x: u32, y: u32) -> f32 {
        let stride = self.stride() as usize;
        let mut sum = 0.0f32;
        let mut n = 0u32;
        for ty in (0..target.h).step_by(stride) {
            for tx in (0..target.w).step_by(stride) {
                let t = target.template[(ty * target.w + tx) as usize];
                let p = f32::from(frame.luma(x + tx, y + ty));
                sum += (t - p).abs();
                n += 1;
            }
        }
        if n == 0 {
            f32::MAX
        } else {
            sum / n as f32
        }
    }
}

fn clamp_to_frame(bbox: &BoundingBox, frame: &Frame) -> Option<(u32, u32, u32, u32)> {
    let fw = frame.width() as i32;
    let fh = frame.height() as i32;
    let xmin = bbox.xmin().clamp(0, fw);
    let ymin = bbox.ymin().clamp(0, fh);
    let xmax = bbox.xmax().clamp(0, fw);
    let ymax = bbox.ymax().clamp(0, fh);
    if xmax <= xmin || ymax <= ymin {
        return None;
    }
    Some((
        xmin as u32,
        ymin as u32,
        (xmax - xmin) as u32,
        (ymax - ymin) as u32,
    ))
}

fn sample_patch(frame: &Frame, x: u32, y: u32, w: u32, h: u32) -> Vec<f32> {
    let mut patch = Vec::with_capacity((w * h) as usize);
    for py in y..y + h {
        for px in x..x + w {
            patch.push(f32::from(frame.luma(px, py)));
        }
    }
    patch
}

impl ObjectTracker for TemplateTracker {
    fn name(&self) -> &'static str {
        "template"
    }

    fn init(&mut self, frame: &Frame, bbox: CenterBox) -> Result<()> {
        self.target = None;
        let corner = bbox.to_corner()?;
        let (x, y, w, h) = clamp_to_frame(&corner, frame)
            .ok_or_else(|| anyhow!("box {:?} does not overlap the frame", bbox))?;
        self.target = Some(Target {
            x,
            y,
            w,
            h,
            template: sample_patch(frame, x, y, w, h),
            frame_size: (frame.width(), frame.height()),
        });
        Ok(())
    }

    fn update(&mut self, frame: &Frame) -> Result<Option<CenterBox>> {
        let Some(target) = self.target.as_ref() else {
            return Err(anyhow!("tracker used before init"));
        };
        if target.frame_size != (frame.width(), frame.height()) {
            return Err(anyhow!(
                "frame size changed from {:?} to {}x{}",
                target.frame_size,
                frame.width(),
                frame.height()
            ));
        }

        let r = self.config.search_radius;
        let max_x = frame.width() - target.w;
        let max_y = frame.height() - target.h;
        let (x_lo, x_hi) = (target.x.saturating_sub(r), (target.x + r).min(max_x));
        let (y_lo, y_hi) = (target.y.saturating_sub(r), (target.y + r).min(max_y));

        let mut best = (f32::MAX, target.x, target.y);
        for y in y_lo..=y_hi {
            for x in x_lo..=x_hi {
                let mad = self.mad_at(frame, target, x, y);
                if mad < best.0 {
                    best = (mad, x, y);
                }
            }
        }

        let (mad, x, y) = best;
        if mad > self.config.max_mad {
            log::debug!(
                "template tracker lost target at frame {} (mad {:.1})",
                frame.index(),
                mad
            );
            return Ok(None);
        }

        let blend = self.config.blend.clamp(0.0, 1.0);
        let Some(target) = self.target.as_mut() else {
            return Ok(None);
        };
        if blend > 0.0 {
            let fresh = sample_patch(frame, x, y, target.w, target.h);
            for (t, f) in target.template.iter_mut().zip(fresh) {
                *t += (f - *t) * blend;
            }
        }
        target.x = x;
        target.y = y;

        let corner = BoundingBox::new(
            x as i32,
            y as i32,
            (x + target.w) as i32,
            (y + target.h) as i32,
        )?;
        Ok(Some(corner.to_center()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameSource, SyntheticConfig, SyntheticSource};
    use crate::manifest::FrameWindow;

    fn synthetic_frames(begin: u32, end: u32) -> Vec<Frame> {
        let mut source =
            SyntheticSource::new(SyntheticConfig::default(), FrameWindow::new(begin, end).unwrap());
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn follows_drifting_square() {
        let config = SyntheticConfig::default();
        let frames = synthetic_frames(0, 10);
        let (x0, y0) = config.square_origin(0);
        let start = BoundingBox::from_xywh(x0 as i32, y0 as i32, 40, 40)
            .unwrap()
            .to_center();

        let mut tracker = TemplateTracker::new(TemplateTrackerConfig::default());
        tracker.init(&frames[0], start).unwrap();
        for frame in &frames[1..] {
            let found = tracker.update(frame).unwrap().unwrap().to_corner().unwrap();
            let (ex, ey) = config.square_origin(frame.index());
            assert_eq!((found.xmin(), found.ymin()), (ex as i32, ey as i32));
            assert_eq!((found.width(), found.height()), (40, 40));
        }
    }

    #[test]
    fn loses_target_that_vanishes() {
        let frames = synthetic_frames(0, 0);
        let config = SyntheticConfig::default();
        let (x0, y0) = config.square_origin(0);
        let start = BoundingBox::from_xywh(x0 as i32, y0 as i32, 40, 40)
            .unwrap()
            .to_center();
        let mut tracker = TemplateTracker::new(TemplateTrackerConfig::default());
        tracker.init(&frames[0], start).unwrap();

        let (w, h) = (config.width, config.height);
        let blank = Frame::new(1, w, h, vec![0; (w * h) as usize * 3]).unwrap();
        assert_eq!(tracker.update(&blank).unwrap(), None);
    }

    #[test]
    fn init_rejects_box_outside_frame() {
        let frames = synthetic_frames(0, 0);
        let mut tracker = TemplateTracker::new(TemplateTrackerConfig::default());
        assert!(tracker
            .init(&frames[0], CenterBox::new(-500, -500, 10, 10))
            .is_err());
        assert!(tracker.update(&frames[0]).is_err());
    }
}
