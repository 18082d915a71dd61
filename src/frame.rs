//! Decoded video frames.
//!
//! A `Frame` is one RGB24 image tagged with its absolute frame index in the
//! source video. Frames are immutable once decoded; the localizer wraps them in
//! `Arc` so the detector session thread can read the same pixels.

use anyhow::{anyhow, Result};

/// Bytes per pixel (RGB24).
pub const CHANNELS: usize = 3;

pub struct Frame {
    index: u32,
    width: u32,
    height: u32,
    /// Row-major RGB24, no row padding.
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(index: u32, width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                index,
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            index,
            width,
            height,
            pixels,
        })
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// RGB triple at `(x, y)`. Caller guarantees bounds.
    #[inline]
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// BT.601 luma at `(x, y)`, integer approximation.
    #[inline]
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let [r, g, b] = self.rgb(x, y);
        ((u32::from(r) * 77 + u32::from(g) * 150 + u32::from(b) * 29) >> 8) as u8
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
