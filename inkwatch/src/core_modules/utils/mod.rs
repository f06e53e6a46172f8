pub mod buffer;
pub mod image_helper;
