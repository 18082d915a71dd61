//! Synthetic video for `stub://` paths.
//!
//! Renders a bright square drifting right across a dark background, so the
//! `cpu` detector and `template` tracker have something real to lock onto.

use anyhow::Result;

use super::FrameSource;
use crate::frame::{Frame, CHANNELS};
use crate::manifest::FrameWindow;

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Total frames in the synthetic video. Windows past this end early.
    pub total_frames: u32,
    pub square: u32,
    /// Horizontal drift in pixels per frame.
    pub step: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            total_frames: 600,
            square: 40,
            step: 2,
        }
    }
}

impl SyntheticConfig {
    /// Top-left corner of the square in a given frame.
    pub fn square_origin(&self, index: u32) -> (u32, u32) {
        let travel = self.width.saturating_sub(self.square).max(1);
        let x = (8 + index.wrapping_mul(self.step)) % travel;
        let y = self.height.saturating_sub(self.square) / 2;
        (x, y)
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    next_index: u32,
    end: u32,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig, window: FrameWindow) -> Self {
        Self {
            config,
            next_index: window.begin(),
            end: window.end(),
        }
    }

    fn render(&self, index: u32) -> Vec<u8> {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        let mut pixels = vec![0u8; w * h * CHANNELS];
        for (i, px) in pixels.iter_mut().enumerate() {
            // faint static texture so template matching has a background
            *px = ((i / CHANNELS + index as usize / 7) % 23) as u8;
        }
        let (ox, oy) = self.config.square_origin(index);
        for y in oy as usize..(oy + self.config.square).min(self.config.height) as usize {
            for x in ox as usize..(ox + self.config.square).min(self.config.width) as usize {
                let i = (y * w + x) * CHANNELS;
                pixels[i..i + CHANNELS].copy_from_slice(&[240, 240, 240]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index > self.end || self.next_index >= self.config.total_frames {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let pixels = self.render(index);
        Frame::new(index, self.config.width, self.config.height, pixels).map(Some)
    }
}
