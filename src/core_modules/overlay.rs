// THEORY:
// The overlay compositor produces the one artifact a human looks at: the new
// revision with every changed pixel painted in its category color. The RGB
// channels always carry the new image so the overlay can be shown on its own;
// the alpha channel says where the paint is.
//
// Key architectural principles:
// 1.  **Transparent by default**: Unchanged pixels keep the new image's color with
//     alpha 0, so stacking the overlay on the new image changes nothing there.
// 2.  **Category paint**: Each set pixel of the removed, added and matched masks
//     takes its category color at full opacity. The masks are exclusive, so the
//     order of painting never matters.
// 3.  **Strength weighting**: With a gamma other than 1 the alpha of painted
//     pixels is scaled by `(peak / 255) ^ gamma`, where `peak` is the larger of
//     the two strength maps. Faint changes fade out, strong ones stay opaque.
// 4.  **Outlines**: The alternative rendering traces only the outer border of
//     every connected blob of each category, `thickness` pixels wide, on an
//     opaque copy of `new`. Holes inside a blob are not traced.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{BinaryMask, FOREGROUND, plane_len, try_gray, try_zeroed};
use crate::core_modules::match_merger::MergedMasks;
use crate::core_modules::morphology::{self, StructuringElement};
use crate::core_modules::parameters::Parameters;
use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::drawing::draw_line_segment_mut;

/// Whether a gamma value asks for strength weighting at all.
pub fn is_weighted(gamma: f64) -> bool {
    (gamma - 1.0).abs() > f64::EPSILON
}

/// Paints the category masks over `new`.
/// `peak` is only consulted when `params.alpha_gamma` is not 1.
pub fn compose(
    new: &RgbImage,
    masks: &MergedMasks,
    peak: Option<&GrayImage>,
    params: &Parameters,
) -> Result<RgbaImage, CoreError> {
    let (width, height) = new.dimensions();
    debug_assert_eq!((width, height), masks.dimensions());
    let len = plane_len(width, height, 4)?;
    let mut overlay = RgbaImage::from_raw(width, height, try_zeroed(len)?)
        .ok_or(CoreError::AllocationFailure { bytes: len })?;

    for (dst, src) in overlay.pixels_mut().zip(new.pixels()) {
        let [r, g, b] = src.0;
        *dst = Rgba([r, g, b, 0]);
    }

    paint(&mut overlay, &masks.removed, params.removed_color.to_array());
    paint(&mut overlay, &masks.added, params.added_color.to_array());
    paint(&mut overlay, &masks.matched, params.matched_color.to_array());

    if is_weighted(params.alpha_gamma) {
        if let Some(peak) = peak {
            weight_alpha(&mut overlay, peak, params.alpha_gamma);
        }
    }
    Ok(overlay)
}

fn paint(overlay: &mut RgbaImage, mask: &BinaryMask, [r, g, b]: [u8; 3]) {
    for (dst, &flag) in overlay.pixels_mut().zip(mask.as_raw()) {
        if flag != 0 {
            *dst = Rgba([r, g, b, 255]);
        }
    }
}

fn weight_alpha(overlay: &mut RgbaImage, peak: &GrayImage, gamma: f64) {
    // Byte strengths have only 256 possible weights.
    let mut table = [0u8; 256];
    for (strength, slot) in table.iter_mut().enumerate() {
        *slot = ((strength as f64 / 255.0).powf(gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    for (dst, &strength) in overlay.pixels_mut().zip(peak.as_raw()) {
        let alpha = dst.0[3];
        if alpha != 0 {
            dst.0[3] = ((alpha as u16 * table[strength as usize] as u16 + 127) / 255) as u8;
        }
    }
}

/// Draws the outer contour of every blob in the category masks over a copy of
/// `new`, each in its category color.
pub fn outline(
    new: &RgbImage,
    masks: &MergedMasks,
    params: &Parameters,
    thickness: u32,
) -> Result<RgbImage, CoreError> {
    debug_assert_eq!(new.dimensions(), masks.dimensions());
    let (width, height) = new.dimensions();
    let len = plane_len(width, height, 3)?;
    let mut canvas = RgbImage::from_raw(width, height, try_zeroed(len)?)
        .ok_or(CoreError::AllocationFailure { bytes: len })?;
    canvas.copy_from_slice(new.as_raw());

    let categories = [
        (&masks.removed, params.removed_color),
        (&masks.added, params.added_color),
        (&masks.matched, params.matched_color),
    ];
    for (mask, color) in categories {
        if mask.is_empty() {
            continue;
        }
        let border = outer_border(mask, thickness)?;
        for (dst, &flag) in canvas.pixels_mut().zip(border.as_raw()) {
            if flag != 0 {
                *dst = Rgb(color.to_array());
            }
        }
    }
    Ok(canvas)
}

/// Traces the outermost contours of `mask` and widens them to `thickness`.
fn outer_border(mask: &BinaryMask, thickness: u32) -> Result<BinaryMask, CoreError> {
    let (width, height) = mask.dimensions();
    let mut plane = try_gray(width, height)?;
    let ink = Luma([FOREGROUND]);
    let contours = find_contours::<i32>(mask.as_image());
    for contour in contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
    {
        let points = &contour.points;
        for (i, from) in points.iter().enumerate() {
            // Contour points always lie on foreground pixels of the mask.
            plane.put_pixel(from.x as u32, from.y as u32, ink);
            let to = points[(i + 1) % points.len()];
            draw_line_segment_mut(
                &mut plane,
                (from.x as f32, from.y as f32),
                (to.x as f32, to.y as f32),
                ink,
            );
        }
    }
    let border = BinaryMask::from_gray(plane);
    if thickness <= 1 {
        return Ok(border);
    }
    morphology::dilate(&border, &StructuringElement::ellipse(thickness))
}

/// The alpha channel of an overlay as a grayscale plane.
pub fn alpha_plane(overlay: &RgbaImage) -> Result<GrayImage, CoreError> {
    let (width, height) = overlay.dimensions();
    let mut plane = try_gray(width, height)?;
    for (dst, src) in plane.iter_mut().zip(overlay.pixels()) {
        *dst = src.0[3];
    }
    Ok(plane)
}
