// THEORY:
// The adaptive threshold stage binarises a difference strength map. Instead of a
// fixed cutoff it learns the cutoff from the map itself: the `(100 - s)`-th
// percentile of all strength values, where `s` is the caller's sensitivity.
// A pair with a uniformly higher noise floor (heavier compression, a different
// renderer) pushes the percentile up with it, so the stage calibrates itself to
// every pair.
//
// Key rules:
// 1.  **Histogram percentile**: Strength values are bytes, so a 256-bin histogram
//     answers any rank query without sorting millions of values. The percentile
//     interpolates linearly between the two closest ranks.
// 2.  **Floor exclusion**: A pixel joins the mask when it is at or above the
//     cutoff *and* strictly above the map's minimum. Pixels sitting on the floor
//     carry no evidence of change; without this rule a mostly-unchanged pair
//     would flag its entire background whenever the percentile lands on zero.
// 3.  **Degenerate maps**: A constant map (including an all-zero one from two
//     identical images) and a sensitivity of 0 both yield an empty mask. That is
//     a valid outcome, never an error.

use crate::core_modules::error::CoreError;
use crate::core_modules::mask::BinaryMask;
use image::GrayImage;

/// Occurrence count of each byte value in a map.
pub type Histogram = [u64; 256];

pub fn histogram(map: &GrayImage) -> Histogram {
    let mut bins = [0u64; 256];
    for &value in map.iter() {
        bins[value as usize] += 1;
    }
    bins
}

/// The value at zero-based `rank` in the sorted sequence the histogram describes.
fn value_at_rank(bins: &Histogram, rank: u64) -> u8 {
    let mut seen = 0u64;
    for (value, &count) in bins.iter().enumerate() {
        seen += count;
        if seen > rank {
            return value as u8;
        }
    }
    255
}

/// Linear-interpolated percentile (0..=100) of the values in `bins`, or `None`
/// when the histogram is empty.
pub fn percentile(bins: &Histogram, percent: f64) -> Option<f64> {
    let total: u64 = bins.iter().sum();
    if total == 0 {
        return None;
    }
    let position = (percent.clamp(0.0, 100.0) / 100.0) * (total - 1) as f64;
    let lower_rank = position.floor() as u64;
    let upper_rank = position.ceil() as u64;
    let lower = value_at_rank(bins, lower_rank) as f64;
    let upper = value_at_rank(bins, upper_rank) as f64;
    Some(lower + (upper - lower) * (position - lower_rank as f64))
}

/// The decision a threshold pass made for one map, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cutoff {
    /// Percentile value a pixel must reach.
    pub value: f64,
    /// Minimum of the map; pixels at this value never pass.
    pub floor: u8,
}

/// Works out the cutoff for `map` at the given sensitivity. `None` means the map
/// cannot produce a foreground pixel (empty, constant, or sensitivity 0).
pub fn cutoff(map: &GrayImage, sensitivity: f64) -> Option<Cutoff> {
    if sensitivity <= 0.0 {
        return None;
    }
    let bins = histogram(map);
    let floor = bins.iter().position(|&c| c > 0)? as u8;
    let ceiling = bins.iter().rposition(|&c| c > 0)? as u8;
    if floor == ceiling {
        return None;
    }
    let value = percentile(&bins, 100.0 - sensitivity)?;
    Some(Cutoff { value, floor })
}

/// Binarises a strength map at the `(100 - sensitivity)`-th percentile.
pub fn threshold(map: &GrayImage, sensitivity: f64) -> Result<BinaryMask, CoreError> {
    apply(map, cutoff(map, sensitivity))
}

/// Binarises a map with a cutoff decided elsewhere. `None` keeps nothing.
pub fn apply(map: &GrayImage, cut: Option<Cutoff>) -> Result<BinaryMask, CoreError> {
    let (width, height) = map.dimensions();
    let Some(cut) = cut else {
        return BinaryMask::empty(width, height);
    };
    BinaryMask::from_fn(width, height, |x, y| {
        let value = map.get_pixel(x, y)[0];
        value > cut.floor && value as f64 >= cut.value
    })
}
