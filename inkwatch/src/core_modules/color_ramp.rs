// THEORY:
// False-color mapping for accumulator intensity. Two linear segments:
// cyan -> yellow over the lower half and yellow -> red over the upper half, so a
// faint, fading stroke reads cool and an actively written one reads hot.

pub type Rgb = [u8; 3];

pub const CYAN: Rgb = [0, 255, 255];
pub const YELLOW: Rgb = [255, 255, 0];
pub const RED: Rgb = [255, 0, 0];

/// Maps `t` in [0, 1] onto the cyan -> yellow -> red ramp. Out-of-range input is clamped.
pub fn heat(t: f64) -> Rgb {
    let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
    if t < 0.5 {
        lerp(CYAN, YELLOW, 2.0 * t)
    } else {
        lerp(YELLOW, RED, 2.0 * (t - 0.5))
    }
}

fn lerp(from: Rgb, to: Rgb, s: f64) -> Rgb {
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * s).round() as u8;
    [mix(from[0], to[0]), mix(from[1], to[1]), mix(from[2], to[2])]
}
