// THEORY (single-pixel color transforms):
// Everything in this module looks at one pixel at a time. It never reads a
// neighbour and never compares two images; that belongs to the distance engine.
//
// Two encodings are provided:
// - CIE L*a*b* (D65), packed into bytes the way 8-bit imaging libraries do it:
//     L  = L* * 255 / 100        (0..=255)
//     a  = a* + 128              (0..=255, 128 is neutral)
//     b  = b* + 128              (0..=255, 128 is neutral)
//   Equal numeric steps in this space are roughly equal perceived steps, which is
//   what makes the per-channel subtraction in the distance engine meaningful.
//   The colorimetry itself is `palette`'s; this module only owns the packing.
// - Rec.601 luma, the single-channel plane structural similarity works on.

pub mod lab {
    use palette::white_point::D65;
    use palette::{FromColor, Lab, Srgb};

    /// A pixel in byte-packed L*a*b*: `[L, a, b]`.
    pub type LabBytes = [u8; 3];

    #[inline]
    fn to_byte(value: f32) -> u8 {
        value.round().clamp(0.0, 255.0) as u8
    }

    /// Converts one sRGB pixel to byte-packed L*a*b*.
    pub fn encode(rgb: [u8; 3]) -> LabBytes {
        let srgb = Srgb::new(rgb[0], rgb[1], rgb[2]).into_format::<f32>();
        let lab: Lab<D65, f32> = Lab::from_color(srgb);
        [
            to_byte(lab.l * 255.0 / 100.0),
            to_byte(lab.a + 128.0),
            to_byte(lab.b + 128.0),
        ]
    }

    /// Memoises the last conversion. Rendered drawings are dominated by long runs
    /// of a handful of colors, so most pixels hit the cache.
    #[derive(Default)]
    pub struct LabEncoder {
        last: Option<([u8; 3], LabBytes)>,
    }

    impl LabEncoder {
        #[inline]
        pub fn encode(&mut self, rgb: [u8; 3]) -> LabBytes {
            match self.last {
                Some((key, lab)) if key == rgb => lab,
                _ => {
                    let lab = encode(rgb);
                    self.last = Some((rgb, lab));
                    lab
                }
            }
        }
    }
}

pub mod luma {
    /// Rec.601 luma of an sRGB pixel, rounded to a byte.
    #[inline]
    pub fn encode(rgb: [u8; 3]) -> u8 {
        let value = 0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32;
        value.round().clamp(0.0, 255.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::{lab, luma};

    #[test]
    fn white_and_black_hit_the_lightness_extremes() {
        let white = lab::encode([255, 255, 255]);
        let black = lab::encode([0, 0, 0]);
        assert_eq!(white[0], 255);
        assert_eq!(black[0], 0);
        // Achromatic colors sit on the neutral axis.
        for channel in [white[1], white[2], black[1], black[2]] {
            assert!((127..=129).contains(&channel), "channel {channel} not neutral");
        }
    }

    #[test]
    fn mid_gray_sits_near_the_middle_of_lightness() {
        // L* of sRGB 128 is about 53.6, which packs to 137.
        let gray = lab::encode([128, 128, 128]);
        assert!((136..=138).contains(&gray[0]), "L = {}", gray[0]);
    }

    #[test]
    fn saturated_red_moves_the_a_axis_up() {
        let red = lab::encode([255, 0, 0]);
        assert!(red[1] > 200, "a = {}", red[1]);
        assert!(red[2] > 180, "b = {}", red[2]);
    }

    #[test]
    fn encoder_cache_matches_direct_conversion() {
        let mut encoder = lab::LabEncoder::default();
        for rgb in [[10, 20, 30], [10, 20, 30], [200, 100, 50]] {
            assert_eq!(encoder.encode(rgb), lab::encode(rgb));
        }
    }

    #[test]
    fn luma_uses_rec601_weights() {
        assert_eq!(luma::encode([255, 255, 255]), 255);
        assert_eq!(luma::encode([0, 0, 0]), 0);
        assert_eq!(luma::encode([255, 0, 0]), 76);
    }
}
