// THEORY:
// The `MotionMap` is the temporal-differencing layer. It compares two comparable
// frames pixel by pixel and marks every pixel whose grayscale moved by more than the
// sensitivity threshold. The map is binary (0 or 255) on purpose: intensity is the
// accumulator's job, not this layer's.
//
// Dilation then closes the small gaps a pen stroke leaves between frames. It is a
// square structuring element of half-width `radius`, implemented as two separable
// max passes (rows, then columns). For a square element the separable result is
// identical to the full (2r+1)^2 scan but costs O(r) per pixel instead of O(r^2).
//
// Edge handling is a policy:
// - `Clip`: border pixels take the maximum over the part of their neighborhood that
//   lies inside the image.
// - `Skip`: only pixels whose full neighborhood is inside the image are computed;
//   a `radius`-wide border is never marked.

use crate::core_modules::frame::Frame;
use crate::core_modules::pixel::pixel::Gray;
use crate::core_modules::utils::buffer::try_filled;
use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Value of a cell where motion was detected.
pub const MOTION: u8 = 255;
/// Value of a cell with no motion.
pub const STILL: u8 = 0;

/// How dilation treats pixels whose neighborhood leaves the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgePolicy {
    #[default]
    Clip,
    Skip,
}

/// A binary per-pixel grid, same dimensions as the frames it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionMap {
    width: u32,
    height: u32,
    cells: Vec<u8>,
}

impl MotionMap {
    /// An all-still map.
    pub fn empty(width: u32, height: u32) -> Result<Self, FrameError> {
        Ok(Self {
            width,
            height,
            cells: try_filled(width as usize * height as usize)?,
        })
    }

    /// Marks every pixel whose grayscale changed by strictly more than `sensitivity`.
    pub fn between(
        current: &Frame,
        previous: &Frame,
        sensitivity: Gray,
    ) -> Result<Self, FrameError> {
        if !current.is_comparable(previous) {
            return Err(FrameError::Incomparable {
                expected: previous.dimensions(),
                actual: current.dimensions(),
            });
        }

        let mut map = Self::empty(current.width(), current.height())?;
        let pairs = current.pixels().zip(previous.pixels());
        for (cell, (now, before)) in map.cells.iter_mut().zip(pairs) {
            if now.gray_delta(&before) > sensitivity {
                *cell = MOTION;
            }
        }
        Ok(map)
    }

    /// Binary dilation with a (2·radius+1)² square structuring element.
    pub fn dilate(&self, radius: u32, edge: EdgePolicy) -> Result<MotionMap, FrameError> {
        let width = self.width as usize;
        let height = self.height as usize;
        let radius = radius as usize;

        // --- 1. Horizontal pass ---
        let mut rows: Vec<u8> = try_filled(self.cells.len())?;
        for y in 0..height {
            let row = &self.cells[y * width..(y + 1) * width];
            for x in 0..width {
                let span = window(x, radius, width);
                rows[y * width + x] = row[span].iter().copied().max().unwrap_or(STILL);
            }
        }

        // --- 2. Vertical pass over the pixels the edge policy allows ---
        let mut dilated = Self::empty(self.width, self.height)?;
        let (columns, lines) = match edge {
            EdgePolicy::Clip => (0..width, 0..height),
            EdgePolicy::Skip => (
                radius..width.saturating_sub(radius),
                radius..height.saturating_sub(radius),
            ),
        };
        for y in lines {
            let span = window(y, radius, height);
            for x in columns.clone() {
                dilated.cells[y * width + x] = span
                    .clone()
                    .map(|row| rows[row * width + x])
                    .max()
                    .unwrap_or(STILL);
            }
        }

        Ok(dilated)
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

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }

    pub fn is_set(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.cells[y as usize * self.width as usize + x as usize] != STILL
    }

    /// Number of cells marked as motion.
    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&cell| cell != STILL).count()
    }

    /// Marks a single cell. Out-of-bounds coordinates are ignored.
    pub fn mark(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            self.cells[y as usize * self.width as usize + x as usize] = MOTION;
        }
    }
}

/// The in-bounds index range `center ± radius` along an axis of length `len`.
fn window(center: usize, radius: usize, len: usize) -> Range<usize> {
    center.saturating_sub(radius)..(center + radius + 1).min(len)
}
