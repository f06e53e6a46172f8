// THEORY:
// The `engine` module is the top-level API of the overlay pipeline. One
// `MotionOverlayEngine` serves exactly one viewing session and owns that session's
// state exclusively: the previous frame and the accumulator. Nothing is global and
// nothing is shared, so two viewers never see each other's motion.
//
// Per frame the engine runs six stages:
// 1. Seeding: with no usable previous frame (first frame, resolution change, reset,
//    or a gap longer than the staleness limit) it stores the frame, allocates a
//    fresh accumulator and returns a dimmed pass-through.
// 2. Temporal differencing into a `MotionMap`.
// 3. Dilation of the motion map.
// 4. Accumulation into the per-pixel low-pass filter.
// 5. Rendering of the overlay.
// 6. The current frame becomes the previous one.
//
// The caller only lends the frame for the duration of the call. The engine copies
// what it needs to keep into buffers it owns.

use crate::config::OverlayConfig;
use crate::core_modules::accumulator::Accumulator;
use crate::core_modules::frame::Frame;
use crate::core_modules::motion_map::MotionMap;
use crate::core_modules::overlay::{self, Overlay};
use crate::error::FrameError;
use std::time::Instant;
use tracing::{debug, warn};

/// Buffers that only exist once the engine has seen a frame. Both always share the
/// dimensions of the last accepted frame.
struct SeededState {
    previous: Frame,
    accumulator: Accumulator,
    last_arrival: Instant,
}

/// Why the engine re-seeded instead of diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedReason {
    FirstFrame,
    Resized,
    Stale,
}

/// Per-session motion overlay state machine.
pub struct MotionOverlayEngine {
    config: OverlayConfig,
    enabled: bool,
    state: Option<SeededState>,
    last_motion: Option<MotionMap>,
    last_dilated: Option<MotionMap>,
    frames_processed: u64,
}

impl Default for MotionOverlayEngine {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl MotionOverlayEngine {
    /// Creates an enabled engine with no state.
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            config,
            enabled: true,
            state: None,
            last_motion: None,
            last_dilated: None,
            frames_processed: 0,
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// Tuning changes take effect on the next frame; they do not reset state.
    pub fn config_mut(&mut self) -> &mut OverlayConfig {
        &mut self.config
    }

    pub fn set_config(&mut self, config: OverlayConfig) {
        self.config = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Turns detection off and drops every buffer. Re-enabling starts from a first frame.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.clear();
    }

    /// Drops every buffer but stays enabled; the next frame re-seeds.
    pub fn reset(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.state = None;
        self.last_motion = None;
        self.last_dilated = None;
    }

    /// Whether a previous frame and accumulator are held.
    pub fn is_seeded(&self) -> bool {
        self.state.is_some()
    }

    pub fn previous_frame(&self) -> Option<&Frame> {
        self.state.as_ref().map(|s| &s.previous)
    }

    pub fn accumulator(&self) -> Option<&Accumulator> {
        self.state.as_ref().map(|s| &s.accumulator)
    }

    /// Raw motion map from the most recent diff.
    pub fn motion_map(&self) -> Option<&MotionMap> {
        self.last_motion.as_ref()
    }

    /// Dilated motion map from the most recent diff.
    pub fn dilated_map(&self) -> Option<&MotionMap> {
        self.last_dilated.as_ref()
    }

    /// Frames that went through the full diff pipeline (seeds excluded).
    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn process_frame(&mut self, frame: &Frame) -> Result<Overlay, FrameError> {
        self.process_frame_at(frame, Instant::now())
    }

    /// Processes a frame that arrived at `arrived`. The arrival time only matters
    /// when a staleness limit is configured.
    pub fn process_frame_at(
        &mut self,
        frame: &Frame,
        arrived: Instant,
    ) -> Result<Overlay, FrameError> {
        if !self.enabled {
            return Err(FrameError::Disabled);
        }
        if frame.is_empty() {
            return Ok(frame.clone());
        }

        let result = self.run_stages(frame, arrived);
        if let Err(error) = &result {
            if error.is_fatal() {
                warn!(%error, "dropping overlay state after allocation failure");
                self.clear();
            }
        }
        result
    }

    fn run_stages(&mut self, frame: &Frame, arrived: Instant) -> Result<Overlay, FrameError> {
        // --- 1. Seeding ---
        if let Some(reason) = self.seed_reason(frame, arrived) {
            return self.seed(frame, arrived, reason);
        }

        let config = &self.config;
        let Some(state) = self.state.as_mut() else {
            return Err(FrameError::Incomparable {
                expected: (0, 0),
                actual: frame.dimensions(),
            });
        };

        // --- 2. Temporal differencing ---
        let motion = MotionMap::between(frame, &state.previous, config.sensitivity())?;

        // --- 3. Dilation ---
        let dilated = motion.dilate(config.dilation_radius(), config.dilation_edge())?;

        // --- 4. Accumulation ---
        if dilated.count() == 0 {
            state.accumulator.decay_only(config.decay());
        } else {
            state.accumulator.integrate(&dilated, config.decay())?;
        }

        // --- 5. Rendering ---
        let overlay = overlay::render(frame, &state.accumulator, &config.style())?;

        // --- 6. Frame hand-over ---
        state.previous.copy_from(frame)?;
        state.last_arrival = arrived;

        debug!(
            moving = motion.count(),
            dilated = dilated.count(),
            peak = state.accumulator.peak(),
            "processed frame"
        );

        self.last_motion = Some(motion);
        self.last_dilated = Some(dilated);
        self.frames_processed += 1;
        Ok(overlay)
    }

    fn seed_reason(&self, frame: &Frame, arrived: Instant) -> Option<SeedReason> {
        let Some(state) = &self.state else {
            return Some(SeedReason::FirstFrame);
        };
        if !state.previous.is_comparable(frame) {
            return Some(SeedReason::Resized);
        }
        match self.config.stale_after() {
            Some(limit) if arrived.saturating_duration_since(state.last_arrival) > limit => {
                Some(SeedReason::Stale)
            }
            _ => None,
        }
    }

    fn seed(
        &mut self,
        frame: &Frame,
        arrived: Instant,
        reason: SeedReason,
    ) -> Result<Overlay, FrameError> {
        self.clear();
        let accumulator = Accumulator::new(frame.width(), frame.height())?;
        let previous = frame.try_clone()?;
        let overlay = overlay::pass_through(frame, self.config.pass_through_dim())?;

        debug!(
            width = frame.width(),
            height = frame.height(),
            ?reason,
            "seeded overlay engine"
        );

        self.state = Some(SeededState {
            previous,
            accumulator,
            last_arrival: arrived,
        });
        Ok(overlay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::overlay::is_visible;
    use crate::core_modules::pixel::pixel::Pixel;
    use std::time::Duration;

    const WHITE: Pixel = Pixel::opaque(255, 255, 255);
    const BLACK: Pixel = Pixel::opaque(0, 0, 0);

    fn black(width: u32, height: u32) -> Frame {
        Frame::filled(width, height, BLACK)
    }

    fn black_with_white_at(width: u32, height: u32, x: u32, y: u32) -> Frame {
        let mut frame = black(width, height);
        frame.set_pixel(x, y, WHITE);
        frame
    }

    fn is_pass_through(overlay: &Overlay, frame: &Frame, factor: f64) -> bool {
        overlay.dimensions() == frame.dimensions()
            && overlay.pixels().zip(frame.pixels()).all(|(o, f)| o == f.dimmed(factor))
    }

    fn colored_pixels(overlay: &Overlay) -> usize {
        overlay.pixels().filter(|p| p.alpha != 255).count()
    }

    #[test]
    fn first_frame_is_a_dimmed_pass_through() {
        let mut engine = MotionOverlayEngine::default();
        let frame = Frame::filled(5, 3, Pixel::opaque(200, 100, 40));
        let overlay = engine.process_frame(&frame).unwrap();
        assert!(is_pass_through(&overlay, &frame, engine.config().pass_through_dim()));
        assert!(engine.is_seeded());
        assert_eq!(engine.frames_processed(), 0);
    }

    #[test]
    fn identical_frames_never_reach_the_colored_branch() {
        let mut engine = MotionOverlayEngine::default();
        let frame = Frame::filled(6, 6, Pixel::opaque(90, 90, 90));
        engine.process_frame(&frame).unwrap();
        let overlay = engine.process_frame(&frame).unwrap();

        assert_eq!(colored_pixels(&overlay), 0);
        assert_eq!(engine.accumulator().unwrap().peak(), 0.0);
        let dim = engine.config().dim_factor();
        assert!(overlay.pixels().all(|p| p == Pixel::opaque(90, 90, 90).dimmed(dim)));
    }

    #[test]
    fn single_pixel_change_on_a_four_by_four_frame() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black(4, 4)).unwrap();
        engine.process_frame(&black_with_white_at(4, 4, 1, 1)).unwrap();

        let motion = engine.motion_map().unwrap();
        assert_eq!(motion.count(), 1);
        assert!(motion.is_set(1, 1));

        let dilated = engine.dilated_map().unwrap();
        let accumulator = engine.accumulator().unwrap();
        for y in 0..4 {
            for x in 0..4 {
                let inside = x <= 2 && y <= 2;
                assert_eq!(dilated.is_set(x, y), inside, "dilated ({x},{y})");
                let value = accumulator.get(x, y).unwrap();
                if inside {
                    assert!((value - 0.15).abs() < 1e-12, "accumulator ({x},{y}) = {value}");
                } else {
                    assert_eq!(value, 0.0, "accumulator ({x},{y})");
                }
            }
        }
    }

    #[test]
    fn dilated_region_covers_the_structuring_element() {
        for radius in 0..=3 {
            let mut config = OverlayConfig::default();
            config.set_dilation_radius(radius);
            let mut engine = MotionOverlayEngine::new(config);
            engine.process_frame(&black(16, 16)).unwrap();
            engine.process_frame(&black_with_white_at(16, 16, 8, 8)).unwrap();

            let side = 2 * radius as usize + 1;
            let dilated = engine.dilated_map().unwrap();
            assert_eq!(dilated.count(), side * side);
            for dy in 0..side as u32 {
                for dx in 0..side as u32 {
                    assert!(dilated.is_set(8 - radius + dx, 8 - radius + dy));
                }
            }
        }
    }

    /// Alternates the frame pair so every step sees the same change at (1,1).
    fn sustained_motion(engine: &mut MotionOverlayEngine, steps: usize) -> Vec<(f64, Overlay)> {
        let still = black(4, 4);
        let moved = black_with_white_at(4, 4, 1, 1);
        engine.process_frame(&still).unwrap();
        (0..steps)
            .map(|step| {
                let frame = if step % 2 == 0 { &moved } else { &still };
                let overlay = engine.process_frame(frame).unwrap();
                (engine.accumulator().unwrap().get(1, 1).unwrap(), overlay)
            })
            .collect()
    }

    #[test]
    fn sustained_motion_rises_and_becomes_visible_after_one_step() {
        let mut engine = MotionOverlayEngine::default();
        let style = engine.config().style();
        let history = sustained_motion(&mut engine, 20);

        let mut last = 0.0;
        for (step, (value, overlay)) in history.iter().enumerate() {
            assert!(*value > last, "step {step} did not increase");
            assert!(is_visible(*value, &style), "step {step} not visible");
            assert_ne!(overlay.pixel(1, 1).unwrap().alpha, 255);
            last = *value;
        }
        assert!(last > 0.95 && last <= 1.0);
    }

    #[test]
    fn motion_fades_geometrically_once_the_pen_stops() {
        let mut engine = MotionOverlayEngine::default();
        let history = sustained_motion(&mut engine, 20);
        let peak = history.last().unwrap().0;
        let floor = engine.config().visibility_floor();
        let decay = engine.config().decay();
        let bound = ((floor / peak).ln() / decay.ln()).ceil() as usize;

        let still = engine.previous_frame().unwrap().clone();
        let mut value = peak;
        let mut frames = 0;
        while value >= floor {
            engine.process_frame(&still).unwrap();
            let next = engine.accumulator().unwrap().get(1, 1).unwrap();
            assert!((next - value * decay).abs() < 1e-12);
            value = next;
            frames += 1;
            assert!(frames <= bound, "still visible after {frames} frames");
        }
        assert_eq!(frames, bound);
        let overlay = engine.process_frame(&still).unwrap();
        assert_eq!(colored_pixels(&overlay), 0);
    }

    #[test]
    fn malformed_raw_frames_leave_state_untouched() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black_with_white_at(4, 4, 2, 2)).unwrap();
        let before = engine.previous_frame().cloned();

        let error = Frame::new(4, 4, vec![0u8; 10])
            .and_then(|frame| engine.process_frame(&frame))
            .unwrap_err();
        assert!(matches!(error, FrameError::Malformed { expected: 64, actual: 10, .. }));
        assert_eq!(engine.previous_frame().cloned(), before);
        assert!(
            Frame::new(4, 4, vec![0u8; 64])
                .and_then(|frame| engine.process_frame(&frame))
                .is_ok()
        );
    }

    #[test]
    fn still_frames_take_the_decay_only_path() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black(4, 4)).unwrap();
        engine.process_frame(&black_with_white_at(4, 4, 1, 1)).unwrap();
        let before = engine.accumulator().unwrap().clone();

        engine.process_frame(&black_with_white_at(4, 4, 1, 1)).unwrap();
        assert_eq!(engine.dilated_map().unwrap().count(), 0);
        let after = engine.accumulator().unwrap();
        for (old, new) in before.values().iter().zip(after.values()) {
            assert_eq!(*new, old * 0.85);
        }
    }

    #[test]
    fn zero_area_frames_are_returned_unchanged() {
        let mut engine = MotionOverlayEngine::default();
        let empty = Frame::new(0, 0, Vec::new()).unwrap();
        assert_eq!(engine.process_frame(&empty).unwrap(), empty);
        assert!(!engine.is_seeded());
    }

    #[test]
    fn resolution_change_reseeds() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black(4, 4)).unwrap();
        engine.process_frame(&black_with_white_at(4, 4, 1, 1)).unwrap();

        let resized = Frame::filled(6, 2, Pixel::opaque(100, 50, 0));
        let overlay = engine.process_frame(&resized).unwrap();
        assert!(is_pass_through(&overlay, &resized, engine.config().pass_through_dim()));
        assert_eq!(engine.accumulator().unwrap().dimensions(), (6, 2));
        assert_eq!(engine.accumulator().unwrap().peak(), 0.0);
        assert!(engine.motion_map().is_none());
    }

    #[test]
    fn reset_behaves_like_a_first_frame() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black(4, 4)).unwrap();
        engine.process_frame(&black_with_white_at(4, 4, 1, 1)).unwrap();
        engine.reset();
        assert!(!engine.is_seeded());
        assert!(engine.is_enabled());

        let frame = black_with_white_at(4, 4, 3, 3);
        let overlay = engine.process_frame(&frame).unwrap();
        assert!(is_pass_through(&overlay, &frame, engine.config().pass_through_dim()));
    }

    #[test]
    fn disabled_engine_refuses_frames_and_restarts_clean() {
        let mut engine = MotionOverlayEngine::default();
        engine.process_frame(&black(4, 4)).unwrap();
        engine.disable();
        assert!(!engine.is_seeded());
        assert_eq!(engine.process_frame(&black(4, 4)), Err(FrameError::Disabled));
        assert!(!engine.is_seeded());

        engine.enable();
        let frame = black_with_white_at(4, 4, 1, 1);
        let overlay = engine.process_frame(&frame).unwrap();
        assert!(is_pass_through(&overlay, &frame, engine.config().pass_through_dim()));
    }

    #[test]
    fn stale_gap_reseeds_instead_of_diffing() {
        let mut config = OverlayConfig::default();
        config.set_stale_after(Some(Duration::from_millis(200)));
        let mut engine = MotionOverlayEngine::new(config);
        let start = Instant::now();

        engine.process_frame_at(&black(4, 4), start).unwrap();
        let fresh = engine
            .process_frame_at(&black_with_white_at(4, 4, 1, 1), start + Duration::from_millis(100))
            .unwrap();
        assert!(colored_pixels(&fresh) > 0);

        let late = black(4, 4);
        let overlay = engine
            .process_frame_at(&late, start + Duration::from_millis(1000))
            .unwrap();
        assert!(is_pass_through(&overlay, &late, engine.config().pass_through_dim()));
        assert_eq!(engine.accumulator().unwrap().peak(), 0.0);
    }

    #[test]
    fn without_a_staleness_limit_long_gaps_still_diff() {
        let mut engine = MotionOverlayEngine::default();
        let start = Instant::now();
        engine.process_frame_at(&black(4, 4), start).unwrap();
        let overlay = engine
            .process_frame_at(&black_with_white_at(4, 4, 1, 1), start + Duration::from_secs(3600))
            .unwrap();
        assert!(colored_pixels(&overlay) > 0);
    }

    #[test]
    fn caller_keeps_ownership_of_its_frame() {
        let mut engine = MotionOverlayEngine::default();
        let mut frame = black(4, 4);
        engine.process_frame(&frame).unwrap();
        frame.set_pixel(0, 0, WHITE);
        assert_eq!(engine.previous_frame().unwrap().pixel(0, 0), Some(BLACK));
    }

    #[test]
    fn same_input_same_output() {
        let run = || {
            let mut engine = MotionOverlayEngine::default();
            engine.process_frame(&black(8, 8)).unwrap();
            engine.process_frame(&black_with_white_at(8, 8, 3, 4)).unwrap()
        };
        assert_eq!(run(), run());
    }
}
