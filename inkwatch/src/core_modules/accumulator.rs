// THEORY:
// The `Accumulator` is the memory of the overlay. Each pixel holds a smoothed motion
// intensity in [0, 1], updated once per processed frame by a first-order IIR
// low-pass filter:
//
//     a = decay * a + (1 - decay) * impulse        impulse ∈ {0.0, 1.0}
//
// Sustained motion (a pen that keeps writing in the same area) drives a pixel toward
// 1.0; a single noisy frame only nudges it by `1 - decay` and the nudge fades
// geometrically. Higher `decay` means slower rise and slower fade.
//
// Values are clamped after every step so rounding can never push a pixel outside
// [0, 1], no matter how many frames a session lives for.

use crate::core_modules::motion_map::{MotionMap, STILL};
use crate::core_modules::utils::buffer::try_filled;
use crate::error::FrameError;

pub type Intensity = f64;

/// Persistent per-pixel motion intensity for one stream session.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    width: u32,
    height: u32,
    values: Vec<Intensity>,
}

impl Accumulator {
    /// A zero-filled accumulator.
    pub fn new(width: u32, height: u32) -> Result<Self, FrameError> {
        Ok(Self {
            width,
            height,
            values: try_filled(width as usize * height as usize)?,
        })
    }

    /// One filter step, using `impulse` as the per-pixel target.
    pub fn integrate(&mut self, impulse: &MotionMap, decay: f64) -> Result<(), FrameError> {
        if impulse.dimensions() != self.dimensions() {
            return Err(FrameError::Incomparable {
                expected: self.dimensions(),
                actual: impulse.dimensions(),
            });
        }

        let gain = 1.0 - decay;
        for (value, &cell) in self.values.iter_mut().zip(impulse.as_slice()) {
            let target = if cell != STILL { 1.0 } else { 0.0 };
            *value = (decay * *value + gain * target).clamp(0.0, 1.0);
        }
        Ok(())
    }

    /// One filter step with no motion anywhere.
    pub fn decay_only(&mut self, decay: f64) {
        for value in &mut self.values {
            *value = (decay * *value).clamp(0.0, 1.0);
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Intensity> {
        (x < self.width && y < self.height)
            .then(|| self.values[y as usize * self.width as usize + x as usize])
    }

    pub fn values(&self) -> &[Intensity] {
        &self.values
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

    /// Largest intensity anywhere in the grid.
    pub fn peak(&self) -> Intensity {
        self.values.iter().copied().fold(0.0, Intensity::max)
    }
}
