pub mod accumulator;
pub mod color_ramp;
pub mod frame;
pub mod motion_map;
pub mod overlay;
pub mod pixel;
pub mod utils;
