// THEORY:
// Downscaling is the spatial-pooling step behind the coarse pass. The full image is
// cut into square blocks of `block x block` pixels and each block collapses into
// its average color, so a 4000x4000 pair becomes a 1000x1000 pair at scale 0.25.
//
// Key architectural principles:
// 1.  **Area Averaging**: Every source pixel contributes to exactly one output
//     pixel with equal weight. Averaging cancels single-pixel noise the same way
//     a blur would, which is what the coarse pass wants.
// 2.  **Partial Edge Blocks**: When the image size is not a multiple of the block,
//     the last column/row of blocks is averaged over the pixels actually present,
//     so every source pixel is accounted for and the output never samples outside.
// 3.  **Integer Block**: The scale factor is turned into a whole block size
//     (`round(1 / scale)`), which keeps the coarse-to-full mapping exact.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{plane_len, try_zeroed};
use image::RgbImage;

/// The block edge, in full-resolution pixels, for a scale factor in (0, 1].
pub fn block_size(scale: f32) -> u32 {
    if !(scale > 0.0) {
        return 1;
    }
    (1.0 / scale).round().max(1.0) as u32
}

/// Output size of a `width x height` image pooled with `block`.
pub fn pooled_dimensions(width: u32, height: u32, block: u32) -> (u32, u32) {
    (width.div_ceil(block), height.div_ceil(block))
}

/// Area-average downscale by an integer block size.
pub fn area_average(image: &RgbImage, block: u32) -> Result<RgbImage, CoreError> {
    if block <= 1 {
        return Ok(image.clone());
    }
    let (width, height) = image.dimensions();
    let (out_width, out_height) = pooled_dimensions(width, height, block);
    let len = plane_len(out_width, out_height, 3)?;
    let mut out = RgbImage::from_raw(out_width, out_height, try_zeroed(len)?)
        .ok_or(CoreError::AllocationFailure { bytes: len })?;

    for (bx, by, pixel) in out.enumerate_pixels_mut() {
        let x0 = bx * block;
        let y0 = by * block;
        let x1 = (x0 + block).min(width);
        let y1 = (y0 + block).min(height);

        let mut sums = [0u64; 3];
        for y in y0..y1 {
            for x in x0..x1 {
                let source = image.get_pixel(x, y);
                for (sum, &channel) in sums.iter_mut().zip(source.0.iter()) {
                    *sum += channel as u64;
                }
            }
        }

        let count = ((x1 - x0) as u64) * ((y1 - y0) as u64);
        for (dst, sum) in pixel.0.iter_mut().zip(sums) {
            *dst = ((sum + count / 2) / count) as u8;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn block_size_rounds_the_inverse_scale() {
        assert_eq!(block_size(0.25), 4);
        assert_eq!(block_size(0.3), 3);
        assert_eq!(block_size(1.0), 1);
        assert_eq!(block_size(0.0), 1);
    }

    #[test]
    fn averages_each_block() {
        let image = RgbImage::from_fn(4, 4, |x, _| {
            if x < 2 { Rgb([0, 0, 0]) } else { Rgb([200, 100, 50]) }
        });
        let small = area_average(&image, 2).unwrap();
        assert_eq!(small.dimensions(), (2, 2));
        assert_eq!(small.get_pixel(0, 0).0, [0, 0, 0]);
        assert_eq!(small.get_pixel(1, 1).0, [200, 100, 50]);
    }

    #[test]
    fn mixed_blocks_take_the_mean() {
        let image = RgbImage::from_fn(2, 2, |x, y| {
            if x == 0 && y == 0 { Rgb([255, 255, 255]) } else { Rgb([0, 0, 0]) }
        });
        let small = area_average(&image, 2).unwrap();
        assert_eq!(small.get_pixel(0, 0).0, [64, 64, 64]);
    }

    #[test]
    fn partial_edge_blocks_use_present_pixels_only() {
        let image = RgbImage::from_fn(5, 1, |x, _| {
            if x == 4 { Rgb([90, 90, 90]) } else { Rgb([10, 10, 10]) }
        });
        let small = area_average(&image, 4).unwrap();
        assert_eq!(small.dimensions(), (2, 1));
        assert_eq!(small.get_pixel(0, 0).0, [10, 10, 10]);
        assert_eq!(small.get_pixel(1, 0).0, [90, 90, 90]);
    }
}
