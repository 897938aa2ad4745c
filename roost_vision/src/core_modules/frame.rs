// THEORY:
// A `Frame` is the caller's raw pixel buffer, borrowed for the duration of a single
// pipeline call. The engine never holds on to it; everything that must outlive the
// call (the previous plane, the background model) is copied into owned state by
// the stage that needs it.
//
// `FrameBuffer` is the owned counterpart used when frames have to cross a task
// boundary, e.g. when a capture thread hands frames to the stream hub.

use crate::core_modules::geometry::FrameSize;
use crate::error::FrameError;
use image::GrayImage;

/// A borrowed, interleaved 8-bit frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// 1 (gray), 3 (RGB) or 4 (RGBA).
    pub channels: u8,
    /// Caller-supplied frame index, echoed in every output.
    pub index: u64,
    /// Caller-supplied capture time in milliseconds.
    pub timestamp_ms: u64,
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, channels: u8, index: u64) -> Self {
        Self {
            data,
            width,
            height,
            channels,
            index,
            timestamp_ms: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Checks the buffer against its declared shape.
    pub fn validate(&self) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 {
            return Err(FrameError::Empty {
                width: self.width,
                height: self.height,
            });
        }
        if !matches!(self.channels, 1 | 3 | 4) {
            return Err(FrameError::UnsupportedChannels(self.channels));
        }
        let expected = self.width as usize * self.height as usize * self.channels as usize;
        if self.data.len() != expected {
            return Err(FrameError::BufferSize {
                width: self.width,
                height: self.height,
                channels: self.channels,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    /// Splits the frame into its colour planes, dropping alpha.
    /// A single-channel frame yields one plane.
    pub fn color_planes(&self) -> Vec<GrayImage> {
        if self.channels == 1 {
            return vec![GrayImage::from_fn(self.width, self.height, |x, y| {
                image::Luma([self.data[self.offset(x, y)]])
            })];
        }
        (0..3)
            .map(|c| {
                GrayImage::from_fn(self.width, self.height, |x, y| {
                    image::Luma([self.data[self.offset(x, y) + c]])
                })
            })
            .collect()
    }

    /// Rec.601 luma of every pixel.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let i = self.offset(x, y);
            if self.channels == 1 {
                return image::Luma([self.data[i]]);
            }
            let r = self.data[i] as u32;
            let g = self.data[i + 1] as u32;
            let b = self.data[i + 2] as u32;
            image::Luma([((299 * r + 587 * g + 114 * b + 500) / 1000) as u8])
        })
    }

    /// The frame as an RGB image, for crop extraction.
    pub fn to_rgb(&self) -> image::RgbImage {
        image::RgbImage::from_fn(self.width, self.height, |x, y| {
            let i = self.offset(x, y);
            if self.channels == 1 {
                let v = self.data[i];
                image::Rgb([v, v, v])
            } else {
                image::Rgb([self.data[i], self.data[i + 1], self.data[i + 2]])
            }
        })
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }
}

/// An owned frame, used to move frames between tasks.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub frame_id: u64,
    pub timestamp_ms: u64,
}

impl FrameBuffer {
    pub fn as_frame(&self) -> Frame<'_> {
        Frame::new(&self.data, self.width, self.height, self.channels, self.frame_id)
            .with_timestamp(self.timestamp_ms)
    }

    pub fn from_rgb(image: &image::RgbImage, frame_id: u64, timestamp_ms: u64) -> Self {
        Self {
            data: image.as_raw().clone(),
            width: image.width(),
            height: image.height(),
            channels: 3,
            frame_id,
            timestamp_ms,
        }
    }
}
