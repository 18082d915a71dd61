//! Local file frame source using FFmpeg.
//!
//! Decodes from the start of the file, converts to RGB24 and hands out the
//! frames inside the requested window. Frames before `begin` are decoded and
//! dropped; decoding stops once `end` has been delivered.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::path::Path;

use crate::frame::Frame;
use crate::manifest::FrameWindow;

pub(crate) struct FfmpegFileSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    window: FrameWindow,
    next_index: u32,
    eof_sent: bool,
    finished: bool,
}

impl FfmpegFileSource {
    pub(crate) fn open(path: &Path, window: FrameWindow) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("failed to open '{}' with ffmpeg", path.display()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::debug!(
            "FileSource: opened {} (ffmpeg, frames {}..={})",
            path.display(),
            window.begin(),
            window.end()
        );

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            window,
            next_index: 0,
            eof_sent: false,
            finished: false,
        })
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if let Some(frame) = self.drain_decoder()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                self.finished = true;
                return Ok(None);
            }
            self.feed_packet()?;
        }
    }

    /// Pull decoded frames until one inside the window appears.
    fn drain_decoder(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let index = self.next_index;
            self.next_index += 1;
            if index < self.window.begin() {
                continue;
            }
            if index > self.window.end() {
                self.finished = true;
                return Ok(None);
            }
            let mut rgb_frame = ffmpeg::frame::Video::empty();
            self.scaler
                .run(&decoded, &mut rgb_frame)
                .context("scale frame to RGB")?;
            let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
            if index == self.window.end() {
                self.finished = true;
            }
            return Frame::new(index, width, height, pixels).map(Some);
        }
        Ok(None)
    }

    fn feed_packet(&mut self) -> Result<()> {
        for (stream, packet) in self.input.packets() {
            if stream.index() != self.stream_index {
                continue;
            }
            self.decoder
                .send_packet(&packet)
                .context("send packet to ffmpeg decoder")?;
            return Ok(());
        }
        self.decoder
            .send_eof()
            .context("flush ffmpeg decoder")?;
        self.eof_sent = true;
        Ok(())
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
