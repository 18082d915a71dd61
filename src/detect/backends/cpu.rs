use anyhow::Result;

use crate::bbox::{BoundingBox, CenterBox};
use crate::detect::backend::GroundingDetector;
use crate::frame::Frame;

/// CPU backend: bounding box of the bright region in the frame.
///
/// Does not understand language. Any non-empty phrase selects the region of
/// pixels whose luma reaches `threshold`; this is enough for synthetic
/// `stub://` videos and smoke tests without a model server.
#[derive(Clone, Debug)]
pub struct SalientRegionDetector {
    pub threshold: u8,
    pub min_pixels: usize,
}

impl Default for SalientRegionDetector {
    fn default() -> Self {
        Self {
            threshold: 200,
            min_pixels: 16,
        }
    }
}

impl SalientRegionDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GroundingDetector for SalientRegionDetector {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame, phrase: &str) -> Result<Option<CenterBox>> {
        if phrase.trim().is_empty() {
            return Ok(None);
        }

        let mut count = 0usize;
        let (mut xmin, mut ymin) = (u32::MAX, u32::MAX);
        let (mut xmax, mut ymax) = (0u32, 0u32);
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                if frame.luma(x, y) >= self.threshold {
                    count += 1;
                    xmin = xmin.min(x);
                    ymin = ymin.min(y);
                    xmax = xmax.max(x);
                    ymax = ymax.max(y);
                }
            }
        }
        if count < self.min_pixels.max(1) {
            return Ok(None);
        }

        let corner = BoundingBox::new(
            xmin as i32,
            ymin as i32,
            xmax as i32 + 1,
            ymax as i32 + 1,
        )?;
        Ok(Some(corner.to_center()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::CHANNELS;

    fn frame_with_patch(x0: u32, y0: u32, size: u32) -> Frame {
        let (w, h) = (64u32, 48u32);
        let mut pixels = vec![10u8; (w * h) as usize * CHANNELS];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let i = (y * w + x) as usize * CHANNELS;
                pixels[i..i + CHANNELS].copy_from_slice(&[250, 250, 250]);
            }
        }
        Frame::new(0, w, h, pixels).unwrap()
    }

    #[test]
    fn finds_bright_patch() {
        let mut detector = SalientRegionDetector::new();
        let found = detector
            .detect(&frame_with_patch(10, 20, 8), "the white square")
            .unwrap()
            .unwrap();
        let corner = found.to_corner().unwrap();
        assert_eq!(
            (corner.xmin(), corner.ymin(), corner.xmax(), corner.ymax()),
            (10, 20, 18, 28)
        );
    }

    #[test]
    fn empty_phrase_finds_nothing() {
        let mut detector = SalientRegionDetector::new();
        assert_eq!(detector.detect(&frame_with_patch(0, 0, 8), "  ").unwrap(), None);
    }

    #[test]
    fn dark_frame_finds_nothing() {
        let mut detector = SalientRegionDetector::new();
        let frame = Frame::new(0, 4, 4, vec![0; 4 * 4 * CHANNELS]).unwrap();
        assert_eq!(detector.detect(&frame, "anything").unwrap(), None);
    }
}
