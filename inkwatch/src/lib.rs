// THEORY:
// This file is the entry point for the `inkwatch` library crate. It exports the
// `MotionOverlayEngine` and its configuration as the high-level interface for
// highlighting handwriting in progress on a live camera stream, plus the pieces
// the binaries need around it: the per-viewer session runner, the frame relay
// bus and the image codecs.
//
// The per-pixel stages (`core_modules`) are public so the tester and the tests can
// inspect intermediate grids, but a consumer only ever needs the engine.

pub mod codec;
pub mod config;
pub mod core_modules;
pub mod engine;
pub mod error;
pub mod relay;
pub mod session;

pub use config::{Config, ConfigError, OverlayConfig};
pub use core_modules::frame::Frame;
pub use core_modules::motion_map::EdgePolicy;
pub use core_modules::overlay::Overlay;
pub use engine::MotionOverlayEngine;
pub use error::{FrameError, SessionError};
