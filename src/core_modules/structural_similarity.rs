// THEORY:
// Structural similarity compares two luma planes neighbourhood by neighbourhood
// instead of pixel by pixel. For every pixel an 11x11 window (clipped at the
// image border) yields the local means, variances and covariance of both planes,
// and the classic SSIM formula combines them into a similarity in [-1, 1].
//
// The window statistics are computed with running sums: a vertical accumulator
// per column is updated as the window slides down one row, and each output row
// reads horizontal window sums off a prefix array built over those accumulators.
// Memory stays at a handful of `width`-long rows no matter how tall the image is.
//
// The comparison core wants difference strength, not similarity, so the map is
// reported as `(1 - clamp(s, 0, 1)) * 255`.

use crate::core_modules::color_distance::ensure_same_dimensions;
use crate::core_modules::color_space::luma;
use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{plane_len, try_gray, try_zeroed};
use image::{GrayImage, RgbImage};

/// Side length of the square SSIM window.
pub const WINDOW: u32 = 11;

const C1: f64 = (0.01 * 255.0) * (0.01 * 255.0);
const C2: f64 = (0.03 * 255.0) * (0.03 * 255.0);

/// Running sums over one column of the current vertical window.
#[derive(Clone, Copy, Default)]
struct Moments {
    x: u64,
    y: u64,
    xx: u64,
    yy: u64,
    xy: u64,
}

impl Moments {
    #[inline]
    fn add(&mut self, a: u8, b: u8) {
        let (a, b) = (a as u64, b as u64);
        self.x += a;
        self.y += b;
        self.xx += a * a;
        self.yy += b * b;
        self.xy += a * b;
    }

    #[inline]
    fn remove(&mut self, a: u8, b: u8) {
        let (a, b) = (a as u64, b as u64);
        self.x -= a;
        self.y -= b;
        self.xx -= a * a;
        self.yy -= b * b;
        self.xy -= a * b;
    }

    #[inline]
    fn plus(self, other: Moments) -> Moments {
        Moments {
            x: self.x + other.x,
            y: self.y + other.y,
            xx: self.xx + other.xx,
            yy: self.yy + other.yy,
            xy: self.xy + other.xy,
        }
    }

    #[inline]
    fn minus(self, other: Moments) -> Moments {
        Moments {
            x: self.x - other.x,
            y: self.y - other.y,
            xx: self.xx - other.xx,
            yy: self.yy - other.yy,
            xy: self.xy - other.xy,
        }
    }

    fn similarity(self, count: u64) -> f64 {
        let n = count as f64;
        let mean_x = self.x as f64 / n;
        let mean_y = self.y as f64 / n;
        let var_x = self.xx as f64 / n - mean_x * mean_x;
        let var_y = self.yy as f64 / n - mean_y * mean_y;
        let cov = self.xy as f64 / n - mean_x * mean_y;

        let numerator = (2.0 * mean_x * mean_y + C1) * (2.0 * cov + C2);
        let denominator = (mean_x * mean_x + mean_y * mean_y + C1) * (var_x + var_y + C2);
        numerator / denominator
    }
}

fn luma_plane(image: &RgbImage) -> Result<Vec<u8>, CoreError> {
    let mut plane = try_zeroed(plane_len(image.width(), image.height(), 1)?)?;
    for (dst, px) in plane.iter_mut().zip(image.pixels()) {
        *dst = luma::encode(px.0);
    }
    Ok(plane)
}

/// `(1 - similarity) * 255` for every pixel.
pub fn dissimilarity_map(old: &RgbImage, new: &RgbImage) -> Result<GrayImage, CoreError> {
    ensure_same_dimensions(old, new)?;
    let (width, height) = old.dimensions();
    let mut map = try_gray(width, height)?;
    for_each_similarity(old, new, |x, y, s| {
        let value = ((1.0 - s) * 255.0).round().clamp(0.0, 255.0) as u8;
        map.put_pixel(x, y, image::Luma([value]));
    })?;
    Ok(map)
}

fn for_each_similarity(
    old: &RgbImage,
    new: &RgbImage,
    mut sink: impl FnMut(u32, u32, f64),
) -> Result<(), CoreError> {
    ensure_same_dimensions(old, new)?;
    let (width, height) = old.dimensions();
    if width == 0 || height == 0 {
        return Ok(());
    }

    let plane_x = luma_plane(old)?;
    let plane_y = luma_plane(new)?;
    let (w, h) = (width as usize, height as usize);
    let radius = (WINDOW / 2) as usize;

    let mut columns = vec![Moments::default(); w];
    let mut prefix = vec![Moments::default(); w + 1];

    // Prime the vertical window for row 0: rows 0..=radius.
    for row in 0..=radius.min(h - 1) {
        for (col, acc) in columns.iter_mut().enumerate() {
            acc.add(plane_x[row * w + col], plane_y[row * w + col]);
        }
    }

    for y in 0..h {
        if y > 0 {
            let entering = y + radius;
            if entering < h {
                for (col, acc) in columns.iter_mut().enumerate() {
                    acc.add(plane_x[entering * w + col], plane_y[entering * w + col]);
                }
            }
            if y > radius {
                let leaving = y - radius - 1;
                for (col, acc) in columns.iter_mut().enumerate() {
                    acc.remove(plane_x[leaving * w + col], plane_y[leaving * w + col]);
                }
            }
        }
        let rows_in_window = (y + radius).min(h - 1) - y.saturating_sub(radius) + 1;

        for col in 0..w {
            prefix[col + 1] = prefix[col].plus(columns[col]);
        }

        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1) + 1;
            let window = prefix[hi].minus(prefix[lo]);
            let count = (rows_in_window * (hi - lo)) as u64;
            let s = window.similarity(count).clamp(0.0, 1.0);
            sink(x as u32, y as u32, s);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn similarity_map(old: &RgbImage, new: &RgbImage) -> Vec<f64> {
        let mut out = Vec::new();
        for_each_similarity(old, new, |_, _, s| out.push(s)).unwrap();
        out
    }

    #[test]
    fn identical_planes_are_perfectly_similar() {
        let mut image = RgbImage::from_pixel(30, 17, Rgb([200, 200, 200]));
        for x in 0..30 {
            image.put_pixel(x, 8, Rgb([10, 10, 10]));
        }
        let map = dissimilarity_map(&image, &image).unwrap();
        assert!(map.iter().all(|&v| v == 0));
    }

    #[test]
    fn a_changed_block_lights_up_its_neighbourhood_only() {
        let old = RgbImage::from_pixel(60, 60, Rgb([255, 255, 255]));
        let mut new = old.clone();
        for y in 25..35 {
            for x in 25..35 {
                new.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        let map = dissimilarity_map(&old, &new).unwrap();
        assert!(map.get_pixel(30, 30)[0] > 100);
        // Farther than a window radius from the block nothing changed.
        assert_eq!(map.get_pixel(5, 5)[0], 0);
        assert_eq!(map.get_pixel(55, 55)[0], 0);
    }

    #[test]
    fn similarity_values_stay_in_unit_range() {
        let old = RgbImage::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 0]));
        let new = RgbImage::from_fn(12, 12, |x, y| Rgb([(y * 20) as u8, (x * 20) as u8, 90]));
        let map = similarity_map(&old, &new);
        assert_eq!(map.len(), 144);
        assert!(map.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn tiny_images_use_clipped_windows() {
        let old = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let new = RgbImage::from_pixel(1, 1, Rgb([255, 255, 255]));
        let map = dissimilarity_map(&old, &new).unwrap();
        assert!(map.get_pixel(0, 0)[0] > 200);
    }
}
