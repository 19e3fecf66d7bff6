// THEORY:
// The image helper is the only place the crate touches encoded image files. The
// comparison core works on decoded buffers; loading, saving and size
// reconciliation live here so callers (the batch runner, the debug dump sink, the
// example binary) share one implementation.
//
// Outputs are always PNG: it is lossless, so an overlay's alpha channel and
// category colors survive exactly as composited.

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{ExtendedColorType, GrayImage, ImageEncoder, ImageResult, RgbImage, RgbaImage};
use std::borrow::Cow;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// File extensions recognised as comparable images.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Whether the path carries one of `IMAGE_EXTENSIONS` (case-insensitive).
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// Decodes any supported image file into 8-bit RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> ImageResult<RgbImage> {
    Ok(image::open(path)?.into_rgb8())
}

fn write_png(
    path: &Path,
    width: u32,
    height: u32,
    buffer: &[u8],
    color: ExtendedColorType,
) -> ImageResult<()> {
    let output = BufWriter::new(File::create(path)?);
    let encoder = PngEncoder::new(output);
    encoder.write_image(buffer, width, height, color)?;
    Ok(())
}

/// Writes an overlay as an RGBA PNG.
pub fn save_overlay(path: impl AsRef<Path>, overlay: &RgbaImage) -> ImageResult<()> {
    let (width, height) = overlay.dimensions();
    write_png(path.as_ref(), width, height, overlay.as_raw(), ExtendedColorType::Rgba8)
}

/// Writes an opaque rendering (outlines, heatmap) as an RGB PNG.
pub fn save_rgb(path: impl AsRef<Path>, image: &RgbImage) -> ImageResult<()> {
    let (width, height) = image.dimensions();
    write_png(path.as_ref(), width, height, image.as_raw(), ExtendedColorType::Rgb8)
}

/// Writes a single-channel plane (mask, strength or alpha map) as a grayscale PNG.
pub fn save_gray(path: impl AsRef<Path>, plane: &GrayImage) -> ImageResult<()> {
    let (width, height) = plane.dimensions();
    write_png(path.as_ref(), width, height, plane.as_raw(), ExtendedColorType::L8)
}

/// Brings two images to a common size: the larger width and the larger height of
/// the pair. Images already at that size are borrowed, others are resampled with
/// Lanczos3.
pub fn reconcile_dimensions<'a>(
    old: &'a RgbImage,
    new: &'a RgbImage,
) -> (Cow<'a, RgbImage>, Cow<'a, RgbImage>) {
    let width = old.width().max(new.width());
    let height = old.height().max(new.height());
    let fit = |image: &'a RgbImage| -> Cow<'a, RgbImage> {
        if image.dimensions() == (width, height) {
            Cow::Borrowed(image)
        } else {
            Cow::Owned(image::imageops::resize(image, width, height, FilterType::Lanczos3))
        }
    };
    (fit(old), fit(new))
}
