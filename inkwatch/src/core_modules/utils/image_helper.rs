pub mod image_helper {
    use crate::core_modules::frame::Frame;
    use image::ImageEncoder;
    use std::path::Path;

    /// Writes a frame (or overlay) to disk as an RGBA PNG.
    pub fn save(path: &Path, frame: &Frame) -> Result<(), image::error::ImageError> {
        let output = std::io::BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new(output);

        encoder.write_image(
            frame.as_bytes(),
            frame.width(),
            frame.height(),
            image::ExtendedColorType::Rgba8,
        )?;

        Ok(())
    }

    /// Reads any image format the `image` crate understands into an RGBA frame.
    pub fn load(path: &Path) -> Result<Frame, image::error::ImageError> {
        Ok(Frame::from(image::open(path)?.to_rgba8()))
    }
}
