// THEORY:
// Rendering is the last stage of the pipeline and the only one that produces pixels
// a person looks at. Every output pixel takes one of two branches:
//
// 1. Hot: the accumulator is above the visibility floor. The pixel is painted with
//    the heat ramp at `t = min(1, 1.5 * a)` and a partial alpha of
//    `min(1, 2 * a) * 200`, so the overlay never fully hides the page beneath it.
// 2. Cold: everything else shows the original frame, dimmed, fully opaque.
//
// The pass-through render used while a session (re)seeds is the cold branch applied
// to every pixel with its own dim factor.

use crate::core_modules::accumulator::{Accumulator, Intensity};
use crate::core_modules::color_ramp::heat;
use crate::core_modules::frame::Frame;
use crate::core_modules::pixel::pixel::{Byte, Pixel};
use crate::error::FrameError;

/// An overlay is an ordinary frame with the same dimensions as its input.
pub type Overlay = Frame;

/// Alpha ceiling for hot pixels.
pub const MAX_OVERLAY_ALPHA: f64 = 200.0;
/// Scale from accumulator intensity to ramp position.
pub const RAMP_GAIN: f64 = 1.5;
/// Scale from accumulator intensity to alpha fraction.
pub const ALPHA_GAIN: f64 = 2.0;

/// The rendering knobs taken from `OverlayConfig`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    /// Minimum intensity rendered as color instead of dimmed background.
    pub visibility_floor: f64,
    /// Brightness multiplier for the cold branch.
    pub dim_factor: f64,
}

/// Whether an intensity renders on the hot branch.
pub fn is_visible(intensity: Intensity, style: &OverlayStyle) -> bool {
    intensity > style.visibility_floor
}

/// Colors one pixel from its accumulator intensity.
pub fn shade(original: Pixel, intensity: Intensity, style: &OverlayStyle) -> Pixel {
    if !is_visible(intensity, style) {
        return original.dimmed(style.dim_factor);
    }
    let [red, green, blue] = heat((intensity * RAMP_GAIN).min(1.0));
    let alpha = ((intensity * ALPHA_GAIN).min(1.0) * MAX_OVERLAY_ALPHA).round() as Byte;
    Pixel::new(red, green, blue, alpha)
}

/// Renders the overlay for `frame` from the accumulator state.
pub fn render(
    frame: &Frame,
    accumulator: &Accumulator,
    style: &OverlayStyle,
) -> Result<Overlay, FrameError> {
    if accumulator.dimensions() != frame.dimensions() {
        return Err(FrameError::Incomparable {
            expected: accumulator.dimensions(),
            actual: frame.dimensions(),
        });
    }

    let mut overlay = Frame::try_blank(frame.width(), frame.height())?;
    for ((out, original), &intensity) in overlay
        .pixels_mut()
        .zip(frame.pixels())
        .zip(accumulator.values())
    {
        out.copy_from_slice(&shade(original, intensity, style).to_bytes());
    }
    Ok(overlay)
}

/// The whole frame dimmed by `factor`, alpha opaque.
pub fn pass_through(frame: &Frame, factor: f64) -> Result<Overlay, FrameError> {
    let mut overlay = Frame::try_blank(frame.width(), frame.height())?;
    for (out, original) in overlay.pixels_mut().zip(frame.pixels()) {
        out.copy_from_slice(&original.dimmed(factor).to_bytes());
    }
    Ok(overlay)
}
