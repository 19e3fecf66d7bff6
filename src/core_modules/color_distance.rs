// THEORY:
// The color distance engine is the first stage of the comparison core. It turns
// two equal-sized RGB buffers into "difference strength" maps: one byte per
// pixel, 0 meaning "no difference", 255 meaning "as different as it gets".
//
// Key design points:
// 1.  **Directional maps**: The channel modes subtract the two encodings channel
//     by channel with saturation, once as `new - old` and once as `old - new`. A
//     channel contributes only to the direction in which it grew, so ink that
//     appears lands in `added` and ink that disappears lands in `removed`.
// 2.  **Grayscale magnitude**: Each direction's three non-negative differences
//     are collapsed with the Rec.601 gray weights. In perceptual mode the L*, a*
//     and b* differences take the blue, green and red weights respectively, so a
//     pure lightness change of 255 is worth 29, and chroma changes dominate.
//     Plain RGB mode weights the sRGB channel differences as luma does.
// 3.  **Noise suppression**: An optional Gaussian blur (odd kernel size) smears
//     isolated single-pixel sensor or compression noise below the threshold the
//     next stage will pick. Kernels of 1 or less leave the maps untouched.
// 4.  **Structural mode**: The alternative lens delegates to the structural
//     similarity module and reports its dissimilarity in the `added` slot with an
//     all-zero `removed` map, since SSIM has no notion of direction.
// 5.  **No shared state**: Every call allocates its own maps; the Lab conversion
//     is done on the fly so no intermediate Lab planes are ever held.

use crate::core_modules::color_space::lab::LabEncoder;
use crate::core_modules::color_space::luma;
use crate::core_modules::error::CoreError;
use crate::core_modules::mask::try_gray;
use crate::core_modules::parameters::DistanceMode;
use crate::core_modules::structural_similarity;
use image::{GrayImage, RgbImage};

/// The two difference strength maps of one comparison.
#[derive(Debug, Clone)]
pub struct StrengthMaps {
    /// Strength of content present in `new` but not in `old`.
    pub added: GrayImage,
    /// Strength of content present in `old` but not in `new`.
    pub removed: GrayImage,
}

impl StrengthMaps {
    pub fn dimensions(&self) -> (u32, u32) {
        self.added.dimensions()
    }

    /// Per-pixel maximum of both directions, the magnitude the overlay alpha follows.
    pub fn peak(&self) -> Result<GrayImage, CoreError> {
        let (width, height) = self.dimensions();
        let mut peak = try_gray(width, height)?;
        let sources = self.added.as_raw().iter().zip(self.removed.as_raw());
        for (dst, (&a, &r)) in peak.iter_mut().zip(sources) {
            *dst = a.max(r);
        }
        Ok(peak)
    }
}

/// Fails with `DimensionMismatch` unless both buffers have the same size.
pub fn ensure_same_dimensions(old: &RgbImage, new: &RgbImage) -> Result<(), CoreError> {
    if old.dimensions() != new.dimensions() {
        return Err(CoreError::DimensionMismatch {
            old_width: old.width(),
            old_height: old.height(),
            new_width: new.width(),
            new_height: new.height(),
        });
    }
    Ok(())
}

/// Computes the strength maps for `old` and `new` in the requested mode.
/// `blur` only applies to the channel modes.
pub fn strength_maps(
    old: &RgbImage,
    new: &RgbImage,
    mode: DistanceMode,
    blur: u32,
) -> Result<StrengthMaps, CoreError> {
    ensure_same_dimensions(old, new)?;
    let maps = match mode {
        DistanceMode::Perceptual => perceptual_strength(old, new)?,
        DistanceMode::Rgb => rgb_strength(old, new)?,
        DistanceMode::Structural => {
            let dissimilarity = structural_similarity::dissimilarity_map(old, new)?;
            let (width, height) = dissimilarity.dimensions();
            return Ok(StrengthMaps {
                added: dissimilarity,
                removed: try_gray(width, height)?,
            });
        }
    };
    Ok(StrengthMaps {
        added: smooth(maps.added, blur),
        removed: smooth(maps.removed, blur),
    })
}

/// Signed L*a*b* differences collapsed to one scalar per direction.
pub fn perceptual_strength(old: &RgbImage, new: &RgbImage) -> Result<StrengthMaps, CoreError> {
    let mut old_encoder = LabEncoder::default();
    let mut new_encoder = LabEncoder::default();
    directional_maps(old, new, |old_px, new_px| {
        let old_lab = old_encoder.encode(old_px);
        let new_lab = new_encoder.encode(new_px);
        (
            lab_magnitude(saturating_difference(new_lab, old_lab)),
            lab_magnitude(saturating_difference(old_lab, new_lab)),
        )
    })
}

/// Signed sRGB channel differences collapsed to their luma.
pub fn rgb_strength(old: &RgbImage, new: &RgbImage) -> Result<StrengthMaps, CoreError> {
    directional_maps(old, new, |old_px, new_px| {
        (
            luma::encode(saturating_difference(new_px, old_px)),
            luma::encode(saturating_difference(old_px, new_px)),
        )
    })
}

/// Fills both maps from a per-pixel `(added, removed)` rule.
fn directional_maps(
    old: &RgbImage,
    new: &RgbImage,
    mut strength: impl FnMut([u8; 3], [u8; 3]) -> (u8, u8),
) -> Result<StrengthMaps, CoreError> {
    ensure_same_dimensions(old, new)?;
    let (width, height) = old.dimensions();
    let mut added = try_gray(width, height)?;
    let mut removed = try_gray(width, height)?;

    let sources = old.pixels().zip(new.pixels());
    let targets = added.iter_mut().zip(removed.iter_mut());
    for ((old_px, new_px), (add, rem)) in sources.zip(targets) {
        (*add, *rem) = strength(old_px.0, new_px.0);
    }

    Ok(StrengthMaps { added, removed })
}

/// Per-channel `from - to`, floored at zero.
#[inline]
fn saturating_difference(from: [u8; 3], to: [u8; 3]) -> [u8; 3] {
    [
        from[0].saturating_sub(to[0]),
        from[1].saturating_sub(to[1]),
        from[2].saturating_sub(to[2]),
    ]
}

/// Gray magnitude of a byte-packed L*a*b* difference.
#[inline]
fn lab_magnitude([l, a, b]: [u8; 3]) -> u8 {
    let value = 0.114 * l as f32 + 0.587 * a as f32 + 0.299 * b as f32;
    value.round().min(255.0) as u8
}

/// Gaussian sigma for an odd kernel size, using the conventional derivation
/// `0.3 * ((k - 1) / 2 - 1) + 0.8`.
pub fn gaussian_sigma(kernel: u32) -> f32 {
    0.3 * ((kernel as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Blurs a strength map with a Gaussian of the given kernel size. A kernel of
/// 1 or less, or an empty map, leaves it untouched.
pub fn smooth(map: GrayImage, kernel: u32) -> GrayImage {
    if kernel <= 1 || map.width() == 0 || map.height() == 0 {
        return map;
    }
    imageproc::filter::gaussian_blur_f32(&map, gaussian_sigma(kernel))
}
