// THEORY:
// The `Pixel` module is the most fundamental unit of the overlay engine. It is a
// "dumb" data container for a single RGBA pixel plus the handful of single-pixel
// heuristics the engine needs: an unweighted grayscale, a pairwise grayscale delta
// and a dimmed copy. Anything that needs neighbors (dilation) or history
// (accumulation) lives in higher-level modules.
//
// Grayscale is the plain mean of R, G and B, not a perceptual luma. Handwriting on
// paper is a near-achromatic signal, and the mean keeps the sensitivity threshold
// directly comparable to channel units.

pub mod pixel {
    pub type Byte = u8;
    pub type Channel = Byte;
    pub type Gray = f64;

    /// Bytes per pixel in every frame buffer (RGBA).
    pub const CHANNELS: usize = 4;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255).
        pub alpha: Channel,
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Pixel {
                red,
                green,
                blue,
                alpha,
            }
        }

        pub const fn opaque(red: Channel, green: Channel, blue: Channel) -> Self {
            Self::new(red, green, blue, Channel::MAX)
        }

        /// Unweighted mean of the color channels. Alpha is ignored.
        pub fn gray(&self) -> Gray {
            (self.red as Gray + self.green as Gray + self.blue as Gray) / 3.0
        }

        /// Absolute grayscale change between two pixels.
        pub fn gray_delta(&self, other: &Pixel) -> Gray {
            (self.gray() - other.gray()).abs()
        }

        /// RGB scaled by `factor`, alpha forced opaque.
        pub fn dimmed(&self, factor: f64) -> Pixel {
            Pixel::opaque(
                scale(self.red, factor),
                scale(self.green, factor),
                scale(self.blue, factor),
            )
        }

        pub const fn to_bytes(self) -> [Byte; CHANNELS] {
            [self.red, self.green, self.blue, self.alpha]
        }
    }

    fn scale(channel: Channel, factor: f64) -> Channel {
        (channel as f64 * factor).round().clamp(0.0, Channel::MAX as f64) as Channel
    }

    impl From<[Byte; CHANNELS]> for Pixel {
        fn from(bytes: [Byte; CHANNELS]) -> Self {
            Pixel::new(bytes[0], bytes[1], bytes[2], bytes[3])
        }
    }

    impl TryFrom<&[Byte]> for Pixel {
        type Error = usize;

        /// Fails with the slice length when it is not exactly one RGBA pixel.
        fn try_from(bytes: &[Byte]) -> Result<Self, Self::Error> {
            <[Byte; CHANNELS]>::try_from(bytes)
                .map(Pixel::from)
                .map_err(|_| bytes.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;

    #[test]
    fn gray_is_the_unweighted_channel_mean() {
        assert_eq!(Pixel::opaque(0, 0, 0).gray(), 0.0);
        assert_eq!(Pixel::opaque(255, 255, 255).gray(), 255.0);
        assert_eq!(Pixel::opaque(30, 60, 90).gray(), 60.0);
        // Alpha never contributes.
        assert_eq!(Pixel::new(30, 60, 90, 0).gray(), 60.0);
    }

    #[test]
    fn gray_delta_is_symmetric() {
        let a = Pixel::opaque(10, 20, 30);
        let b = Pixel::opaque(100, 110, 120);
        assert_eq!(a.gray_delta(&b), 90.0);
        assert_eq!(b.gray_delta(&a), 90.0);
    }

    #[test]
    fn dimming_scales_color_and_forces_opaque_alpha() {
        let dimmed = Pixel::new(200, 100, 0, 17).dimmed(0.3);
        assert_eq!(dimmed, Pixel::new(60, 30, 0, 255));
    }

    #[test]
    fn slice_conversion_rejects_partial_pixels() {
        assert_eq!(Pixel::try_from(&[1u8, 2, 3, 4][..]), Ok(Pixel::new(1, 2, 3, 4)));
        assert_eq!(Pixel::try_from(&[1u8, 2, 3][..]), Err(3));
    }
}
