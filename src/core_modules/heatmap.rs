// THEORY:
// The heatmap is the undirected companion of the overlay. Where the overlay
// answers "what changed, and which way", the heatmap answers "how much did each
// pixel change" for a reviewer scanning a sheet for hot spots. No thresholding,
// shape filtering or matching runs, so faint differences stay visible.
//
// Key rules:
// 1.  **Symmetric magnitude**: Perceptual mode takes the Euclidean length of the
//     absolute byte-packed L*a*b* difference. Plain RGB mode takes the luma of
//     the absolute channel difference. Structural mode shows the dissimilarity.
// 2.  **Min-max stretch**: Magnitudes are stretched so the smallest maps to 0
//     and the largest to 255. A pair with one uniform magnitude (identical
//     images included) maps everywhere to 0.
// 3.  **Jet ramp**: Stretched values are colored dark blue through cyan, yellow
//     and on to dark red.

use crate::core_modules::color_distance::ensure_same_dimensions;
use crate::core_modules::color_space::lab::LabEncoder;
use crate::core_modules::color_space::luma;
use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{plane_len, try_zeroed};
use crate::core_modules::parameters::DistanceMode;
use crate::core_modules::structural_similarity;
use image::RgbImage;

/// Renders the per-pixel difference magnitude between `old` and `new` as a
/// jet-colored image.
pub fn heatmap(old: &RgbImage, new: &RgbImage, mode: DistanceMode) -> Result<RgbImage, CoreError> {
    ensure_same_dimensions(old, new)?;
    let magnitudes = magnitudes(old, new, mode)?;
    let (width, height) = old.dimensions();
    let len = plane_len(width, height, 3)?;
    let mut out = RgbImage::from_raw(width, height, try_zeroed(len)?)
        .ok_or(CoreError::AllocationFailure { bytes: len })?;

    let ramp = jet_table();
    let stretch = Stretch::over(&magnitudes);
    for (dst, &magnitude) in out.pixels_mut().zip(&magnitudes) {
        dst.0 = ramp[stretch.apply(magnitude) as usize];
    }
    Ok(out)
}

fn magnitudes(old: &RgbImage, new: &RgbImage, mode: DistanceMode) -> Result<Vec<f32>, CoreError> {
    let (width, height) = old.dimensions();
    let len = plane_len(width, height, 1)?;
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| CoreError::AllocationFailure { bytes: len * size_of::<f32>() })?;

    match mode {
        DistanceMode::Perceptual => {
            let mut old_encoder = LabEncoder::default();
            let mut new_encoder = LabEncoder::default();
            for (o, n) in old.pixels().zip(new.pixels()) {
                let d = absolute_difference(old_encoder.encode(o.0), new_encoder.encode(n.0));
                let squared: f32 = d.iter().map(|&c| (c as f32) * (c as f32)).sum();
                values.push(squared.sqrt());
            }
        }
        DistanceMode::Rgb => {
            for (o, n) in old.pixels().zip(new.pixels()) {
                values.push(luma::encode(absolute_difference(o.0, n.0)) as f32);
            }
        }
        DistanceMode::Structural => {
            let map = structural_similarity::dissimilarity_map(old, new)?;
            values.extend(map.as_raw().iter().map(|&v| v as f32));
        }
    }
    Ok(values)
}

#[inline]
fn absolute_difference(a: [u8; 3], b: [u8; 3]) -> [u8; 3] {
    [a[0].abs_diff(b[0]), a[1].abs_diff(b[1]), a[2].abs_diff(b[2])]
}

/// Linear map from `[min, max]` onto `0..=255`.
#[derive(Debug, Clone, Copy)]
struct Stretch {
    min: f32,
    scale: f32,
}

impl Stretch {
    fn over(values: &[f32]) -> Self {
        let (min, max) = values
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let scale = if max - min > f32::EPSILON { 255.0 / (max - min) } else { 0.0 };
        Self { min, scale }
    }

    #[inline]
    fn apply(self, value: f32) -> u8 {
        ((value - self.min) * self.scale).round().clamp(0.0, 255.0) as u8
    }
}

/// The 256 colors of the jet ramp.
pub fn jet_table() -> [[u8; 3]; 256] {
    let channel = |t: f32, center: f32| {
        let v = (1.5 - (4.0 * t - center).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    let mut table = [[0u8; 3]; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let t = i as f32 / 255.0;
        *slot = [channel(t, 3.0), channel(t, 2.0), channel(t, 1.0)];
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn jet_runs_from_dark_blue_to_dark_red() {
        let table = jet_table();
        assert_eq!(table[0], [0, 0, 128]);
        assert_eq!(table[255], [128, 0, 0]);
        assert_eq!(table[128][1], 255);
    }

    #[test]
    fn identical_images_are_uniformly_cold() {
        let image = solid(8, 8, [40, 90, 200]);
        for mode in [DistanceMode::Perceptual, DistanceMode::Rgb, DistanceMode::Structural] {
            let map = heatmap(&image, &image, mode).unwrap();
            assert!(map.pixels().all(|p| p.0 == [0, 0, 128]), "{mode:?}");
        }
    }

    #[test]
    fn the_strongest_change_is_the_hottest_pixel() {
        let old = solid(10, 10, [255, 255, 255]);
        let mut new = old.clone();
        new.put_pixel(2, 2, Rgb([0, 0, 0]));
        new.put_pixel(7, 7, Rgb([200, 200, 200]));
        for mode in [DistanceMode::Perceptual, DistanceMode::Rgb] {
            let map = heatmap(&old, &new, mode).unwrap();
            assert_eq!(map.get_pixel(2, 2).0, [128, 0, 0], "{mode:?}");
            assert_eq!(map.get_pixel(0, 0).0, [0, 0, 128], "{mode:?}");
            let mid = map.get_pixel(7, 7).0;
            assert_ne!(mid, [0, 0, 128]);
            assert_ne!(mid, [128, 0, 0]);
        }
    }

    #[test]
    fn heatmap_rejects_mismatched_sizes() {
        let err = heatmap(&solid(3, 3, [0; 3]), &solid(3, 4, [0; 3]), DistanceMode::Rgb);
        assert!(matches!(err, Err(CoreError::DimensionMismatch { .. })));
    }
}
