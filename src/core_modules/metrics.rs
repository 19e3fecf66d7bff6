// THEORY:
// The metrics reporter condenses a comparison into numbers a caller can act on
// without looking at the overlay: how many pixels fall into each category and
// what share of the image that is. Batch callers use `is_equal` to decide whether
// a pair needs human attention at all.
//
// The masks it counts are mutually exclusive, so `same + added + removed + matched`
// always equals the pixel total and the four percentages sum to 100.

use crate::core_modules::match_merger::MergedMasks;

/// Summary statistics of one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub same_pixels: u64,
    pub added_pixels: u64,
    pub removed_pixels: u64,
    pub matched_pixels: u64,
    /// Every pixel not counted as same.
    pub diff_pixels: u64,
    pub total_pixels: u64,
    pub same_percent: f64,
    pub added_percent: f64,
    pub removed_percent: f64,
    pub matched_percent: f64,
    /// The coarse pre-pass declared the pair equal and no fine pass ran.
    pub short_circuited: bool,
}

impl Metrics {
    /// Builds the report from per-category pixel counts.
    pub fn from_counts(total: u64, added: u64, removed: u64, matched: u64) -> Self {
        let diff = added + removed + matched;
        let same = total.saturating_sub(diff);
        let percent = |count: u64| {
            if total == 0 {
                0.0
            } else {
                count as f64 * 100.0 / total as f64
            }
        };
        Self {
            same_pixels: same,
            added_pixels: added,
            removed_pixels: removed,
            matched_pixels: matched,
            diff_pixels: total - same,
            total_pixels: total,
            same_percent: if total == 0 { 100.0 } else { percent(same) },
            added_percent: percent(added),
            removed_percent: percent(removed),
            matched_percent: percent(matched),
            short_circuited: false,
        }
    }

    /// Counts the category masks of a finished comparison.
    pub fn from_masks(masks: &MergedMasks) -> Self {
        let (width, height) = masks.dimensions();
        Self::from_counts(
            width as u64 * height as u64,
            masks.added.count() as u64,
            masks.removed.count() as u64,
            masks.matched.count() as u64,
        )
    }

    /// The report for a pair the coarse pre-pass found equal.
    pub fn equal(width: u32, height: u32) -> Self {
        Self {
            short_circuited: true,
            ..Self::from_counts(width as u64 * height as u64, 0, 0, 0)
        }
    }

    pub fn is_equal(&self) -> bool {
        self.diff_pixels == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_sum_to_one_hundred() {
        let metrics = Metrics::from_counts(1000, 30, 20, 7);
        let m = &metrics;
        let sum = m.same_percent + m.added_percent + m.removed_percent + m.matched_percent;
        assert!((sum - 100.0).abs() < 1e-9);
        assert_eq!(metrics.diff_pixels, 57);
        assert_eq!(metrics.same_pixels, 943);
        assert!(!metrics.is_equal());
    }

    #[test]
    fn zero_sized_images_are_entirely_same() {
        let metrics = Metrics::from_counts(0, 0, 0, 0);
        assert_eq!(metrics.same_percent, 100.0);
        assert_eq!(metrics.added_percent, 0.0);
        assert!(metrics.is_equal());
    }

    #[test]
    fn equal_report_is_flagged_as_short_circuited() {
        let metrics = Metrics::equal(10, 10);
        assert!(metrics.short_circuited);
        assert!(metrics.is_equal());
        assert_eq!(metrics.total_pixels, 100);
        assert_eq!(metrics.same_percent, 100.0);
    }
}
