// THEORY:
// A `Frame` is one decoded image from a video stream: a flat, row-major RGBA buffer
// plus its dimensions. The constructor is the only place a raw buffer becomes a
// frame, so every `Frame` in the system satisfies `data.len() == width * height * 4`
// and the stages downstream can index it without bounds surprises.
//
// Two frames are comparable only when their dimensions match exactly. The engine
// never diffs incomparable frames; it re-seeds instead.

use crate::core_modules::pixel::pixel::{Byte, CHANNELS, Pixel};
use crate::core_modules::utils::buffer::try_filled;
use crate::error::FrameError;
use image::RgbaImage;

/// One decoded RGBA image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<Byte>,
}

/// Number of bytes an RGBA buffer of the given size must hold.
pub fn expected_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

impl Frame {
    /// Wraps a raw RGBA buffer, rejecting it when its length disagrees with the
    /// declared dimensions.
    pub fn new(width: u32, height: u32, data: Vec<Byte>) -> Result<Self, FrameError> {
        let expected = expected_len(width, height);
        if data.len() != expected {
            return Err(FrameError::Malformed {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame where every pixel is `pixel`.
    pub fn filled(width: u32, height: u32, pixel: Pixel) -> Self {
        let data = pixel
            .to_bytes()
            .into_iter()
            .cycle()
            .take(expected_len(width, height))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Allocates a zeroed frame without aborting on exhaustion.
    pub(crate) fn try_blank(width: u32, height: u32) -> Result<Self, FrameError> {
        Ok(Self {
            width,
            height,
            data: try_filled(expected_len(width, height))?,
        })
    }

    /// A fallible deep copy, used wherever the engine must retain a caller's frame.
    pub(crate) fn try_clone(&self) -> Result<Self, FrameError> {
        let mut copy = Self::try_blank(self.width, self.height)?;
        copy.data.copy_from_slice(&self.data);
        Ok(copy)
    }

    /// Overwrites this frame's pixels with `other`'s, reusing the allocation.
    pub(crate) fn copy_from(&mut self, other: &Frame) -> Result<(), FrameError> {
        if !self.is_comparable(other) {
            return Err(FrameError::Incomparable {
                expected: self.dimensions(),
                actual: other.dimensions(),
            });
        }
        self.data.copy_from_slice(&other.data);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel count.
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn is_comparable(&self, other: &Frame) -> bool {
        self.dimensions() == other.dimensions()
    }

    pub fn as_bytes(&self) -> &[Byte] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<Byte> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| (y as usize * self.width as usize + x as usize) * CHANNELS)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Pixel> {
        let offset = self.offset(x, y)?;
        Pixel::try_from(&self.data[offset..offset + CHANNELS]).ok()
    }

    /// Writes one pixel. Returns `false` when the coordinate is outside the frame.
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: Pixel) -> bool {
        match self.offset(x, y) {
            Some(offset) => {
                self.data[offset..offset + CHANNELS].copy_from_slice(&pixel.to_bytes());
                true
            }
            None => false,
        }
    }

    /// Row-major iterator over every pixel.
    pub fn pixels(&self) -> impl Iterator<Item = Pixel> + '_ {
        self.data
            .chunks_exact(CHANNELS)
            .map(|bytes| Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3]))
    }

    pub(crate) fn pixels_mut(&mut self) -> impl Iterator<Item = &mut [Byte]> + '_ {
        self.data.chunks_exact_mut(CHANNELS)
    }

    pub fn into_image(self) -> RgbaImage {
        let (width, height) = self.dimensions();
        RgbaImage::from_raw(width, height, self.data)
            .unwrap_or_else(|| RgbaImage::new(width, height))
    }
}

impl From<RgbaImage> for Frame {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
        }
    }
}
