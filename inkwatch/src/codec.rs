// THEORY:
// The camera page ships frames as compressed images, either as raw bytes or as a
// `data:image/jpeg;base64,...` URL inside a JSON message. The engine only
// understands decoded RGBA frames, so this module is the bridge in both directions:
// compressed bytes to `Frame` on the way in, `Frame` to PNG on the way out.

use crate::core_modules::frame::Frame;
use crate::error::FrameError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("payload is not a base64 data URL")]
    DataUrl,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image codec failed: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Decodes any image format the `image` crate can sniff into an RGBA frame.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, CodecError> {
    let image = image::load_from_memory(bytes)?;
    Ok(Frame::from(image.to_rgba8()))
}

/// Extracts the binary payload of a base64 `data:` URL.
pub fn data_url_bytes(url: &str) -> Result<Vec<u8>, CodecError> {
    let rest = url.trim().strip_prefix("data:").ok_or(CodecError::DataUrl)?;
    let (media, payload) = rest.split_once(',').ok_or(CodecError::DataUrl)?;
    if !media.ends_with(";base64") {
        return Err(CodecError::DataUrl);
    }
    Ok(STANDARD.decode(payload)?)
}

/// Lossless RGBA encoding; keeps the overlay's partial alpha.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer).write_image(
        frame.as_bytes(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}
