// THEORY:
// Full-resolution differencing of a large drawing pair (think 4000x4000 plans) is
// dominated by pixels that did not change. The coarse-to-fine tiler spends a cheap
// low-resolution pass to find out *where* change is, and only pays for full
// resolution there.
//
// Key architectural principles & algorithm steps:
// 1.  **Fine Pass**: The unit of work is `fine_pass`: strength maps, adaptive
//     threshold on each, then the noise and shape filter. It runs on a whole
//     image in direct mode and on a crop per candidate region here.
// 2.  **Coarse Pass**: Both images are area-averaged by a block of
//     `round(1 / scale)` pixels. The coarse maps are thresholded with the
//     sensitivity scaled by the same factor (floored at `MIN_COARSE_SENSITIVITY`)
//     and cleaned with a fixed minimum area of `COARSE_MIN_AREA`.
// 3.  **Short-circuit**: If the coarse mask is empty or covers less than
//     `equal_ratio` of the coarse image, the pair is equal. No fine pass runs.
// 4.  **Refinement**: Each coarse component's box is scaled back up by the block
//     size and clipped to the image. The fine pass reruns inside it; a region is
//     accepted only if it still shows change at full resolution. Inside a region
//     the cutoffs are not re-learned: a crop that lies wholly within a changed
//     area is a constant map and would learn nothing. Instead the coarse maps,
//     whose value distribution area averaging preserves, supply the cutoff at the
//     caller's full sensitivity for each direction.
// 5.  **Global Assembly**: Accepted region masks are OR-ed and their peak strengths
//     max-ed into full-size planes. Merging, compositing and metrics run on those
//     planes afterwards, so category exclusivity holds across region borders.

use crate::core_modules::color_distance::{self, StrengthMaps};
use crate::core_modules::downscale;
use crate::core_modules::error::CoreError;
use crate::core_modules::mask::{BinaryMask, try_gray};
use crate::core_modules::observer::{DiffEvent, DiffObserver, NoopObserver, Stage};
use crate::core_modules::overlay;
use crate::core_modules::parameters::{CoarseToFine, Parameters};
use crate::core_modules::regions::{self, Region};
use crate::core_modules::threshold::{self, Cutoff};
use image::{GrayImage, RgbImage};

/// Minimum component area of the coarse pass, in coarse pixels.
pub const COARSE_MIN_AREA: u32 = 10;
/// Lower bound for the scaled coarse sensitivity.
pub const MIN_COARSE_SENSITIVITY: f64 = 0.05;

/// Cleaned added/removed masks of one fine pass.
#[derive(Debug, Clone)]
pub struct Detection {
    pub added: BinaryMask,
    pub removed: BinaryMask,
    /// Per-pixel max of both strength maps; only kept when the overlay weights
    /// alpha by strength.
    pub peak: Option<GrayImage>,
}

impl Detection {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// How a fine pass picks the cutoff for each strength map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Thresholds {
    /// Learn each cutoff from the map at hand, at this sensitivity.
    Percentile(f64),
    /// Cutoffs learned beforehand, one per direction.
    Learned {
        added: Option<Cutoff>,
        removed: Option<Cutoff>,
    },
}

impl Thresholds {
    fn apply(&self, maps: &StrengthMaps) -> Result<(BinaryMask, BinaryMask), CoreError> {
        match *self {
            Thresholds::Percentile(sensitivity) => Ok((
                threshold::threshold(&maps.added, sensitivity)?,
                threshold::threshold(&maps.removed, sensitivity)?,
            )),
            Thresholds::Learned { added, removed } => Ok((
                threshold::apply(&maps.added, added)?,
                threshold::apply(&maps.removed, removed)?,
            )),
        }
    }
}

/// What the tiler concluded for a pair.
#[derive(Debug, Clone)]
pub enum CoarseOutcome {
    Equal {
        coarse_width: u32,
        coarse_height: u32,
        changed_ratio: f64,
    },
    Changed(Detection),
}

/// Strength, threshold and shape filter over a whole pair of equal-sized images.
pub fn fine_pass(
    old: &RgbImage,
    new: &RgbImage,
    params: &Parameters,
    observer: &dyn DiffObserver,
) -> Result<Detection, CoreError> {
    detect(old, new, params, Thresholds::Percentile(params.sensitivity), observer)
}

/// The fine pass with an explicit cutoff policy.
pub fn detect(
    old: &RgbImage,
    new: &RgbImage,
    params: &Parameters,
    thresholds: Thresholds,
    observer: &dyn DiffObserver,
) -> Result<Detection, CoreError> {
    // --- 1. Strength ---
    let maps = color_distance::strength_maps(old, new, params.mode, params.blur)?;
    observer.on_event(&DiffEvent::StageFinished {
        stage: Stage::Strength,
        added: nonzero(&maps.added),
        removed: nonzero(&maps.removed),
        matched: 0,
    });

    // --- 2. Threshold ---
    let (added, removed) = thresholds.apply(&maps)?;
    let peak = peak_if_weighted(&maps, params)?;
    drop(maps);
    observer.on_event(&DiffEvent::StageFinished {
        stage: Stage::Threshold,
        added: added.count(),
        removed: removed.count(),
        matched: 0,
    });

    // --- 3. Noise & shape filter ---
    let added = regions::shape_filter(&added, params.min_area, params.dilation)?;
    let removed = regions::shape_filter(&removed, params.min_area, params.dilation)?;
    observer.on_event(&DiffEvent::StageFinished {
        stage: Stage::ShapeFilter,
        added: added.count(),
        removed: removed.count(),
        matched: 0,
    });

    Ok(Detection { added, removed, peak })
}

fn nonzero(map: &GrayImage) -> usize {
    map.as_raw().iter().filter(|&&v| v != 0).count()
}

fn peak_if_weighted(
    maps: &StrengthMaps,
    params: &Parameters,
) -> Result<Option<GrayImage>, CoreError> {
    if overlay::is_weighted(params.alpha_gamma) {
        Ok(Some(maps.peak()?))
    } else {
        Ok(None)
    }
}

/// The sensitivity used on the downscaled pair.
pub fn coarse_sensitivity(sensitivity: f64, scale: f32) -> f64 {
    (sensitivity * scale as f64).max(MIN_COARSE_SENSITIVITY)
}

/// Result of the low-resolution pass.
#[derive(Debug, Clone)]
pub struct CoarsePass {
    /// Cleaned union of both directions' candidates.
    pub mask: BinaryMask,
    /// Cutoffs for the full-resolution refinement.
    pub refine: Thresholds,
}

/// Candidate mask at `candidate_sensitivity` plus refinement cutoffs at the
/// caller's own sensitivity, both from the same downscaled maps.
pub fn coarse_pass(
    old_small: &RgbImage,
    new_small: &RgbImage,
    params: &Parameters,
    candidate_sensitivity: f64,
) -> Result<CoarsePass, CoreError> {
    let maps = color_distance::strength_maps(old_small, new_small, params.mode, params.blur)?;
    let (added, removed) = Thresholds::Percentile(candidate_sensitivity).apply(&maps)?;
    let refine = Thresholds::Learned {
        added: threshold::cutoff(&maps.added, params.sensitivity),
        removed: threshold::cutoff(&maps.removed, params.sensitivity),
    };
    drop(maps);
    let combined = added.union(&removed)?;
    let mask = regions::remove_small_components(&combined, COARSE_MIN_AREA)?;
    Ok(CoarsePass { mask, refine })
}

/// Maps a coarse region to full resolution, clipped to `width x height`.
pub fn to_full_resolution(region: &Region, block: u32, width: u32, height: u32) -> Region {
    let x = region.x.saturating_mul(block).min(width);
    let y = region.y.saturating_mul(block).min(height);
    let right = region.right().saturating_mul(block).min(width);
    let bottom = region.bottom().saturating_mul(block).min(height);
    Region {
        x,
        y,
        width: right - x,
        height: bottom - y,
        area: region.area.saturating_mul(block.saturating_mul(block)),
    }
}

/// Runs the coarse pass and, unless it decides the pair is equal, refines every
/// candidate region at full resolution.
pub fn coarse_to_fine(
    old: &RgbImage,
    new: &RgbImage,
    params: &Parameters,
    settings: &CoarseToFine,
    observer: &dyn DiffObserver,
) -> Result<CoarseOutcome, CoreError> {
    color_distance::ensure_same_dimensions(old, new)?;
    let (width, height) = old.dimensions();
    let block = downscale::block_size(settings.scale);

    // --- 1. Coarse pass ---
    let sensitivity = coarse_sensitivity(params.sensitivity, settings.scale);
    let CoarsePass { mask, refine } = {
        let old_small = downscale::area_average(old, block)?;
        let new_small = downscale::area_average(new, block)?;
        coarse_pass(&old_small, &new_small, params, sensitivity)?
    };
    let (coarse_width, coarse_height) = mask.dimensions();
    let coarse_pixels = coarse_width as u64 * coarse_height as u64;
    let changed = mask.count() as u64;
    let changed_ratio = if coarse_pixels == 0 {
        0.0
    } else {
        changed as f64 / coarse_pixels as f64
    };

    // --- 2. Short-circuit ---
    if changed == 0 || changed_ratio < settings.equal_ratio {
        observer.on_event(&DiffEvent::CoarseShortCircuit {
            coarse_width,
            coarse_height,
            changed_ratio,
        });
        return Ok(CoarseOutcome::Equal {
            coarse_width,
            coarse_height,
            changed_ratio,
        });
    }

    // --- 3. Refinement ---
    let candidates = regions::regions(&mask, 1);
    drop(mask);

    let mut added = BinaryMask::empty(width, height)?;
    let mut removed = BinaryMask::empty(width, height)?;
    let mut peak = if overlay::is_weighted(params.alpha_gamma) {
        Some(try_gray(width, height)?)
    } else {
        None
    };

    for candidate in candidates {
        let region = to_full_resolution(&candidate, block, width, height);
        if region.is_empty() {
            continue;
        }
        let crop = |image: &RgbImage| {
            image::imageops::crop_imm(image, region.x, region.y, region.width, region.height)
                .to_image()
        };
        let (old_crop, new_crop) = (crop(old), crop(new));
        let detection = detect(&old_crop, &new_crop, params, refine, &NoopObserver)?;

        if detection.is_empty() {
            observer.on_event(&DiffEvent::RegionRejected { region });
            continue;
        }

        // --- 4. Global assembly ---
        added.union_patch(&detection.added, region.x, region.y);
        removed.union_patch(&detection.removed, region.x, region.y);
        if let (Some(full), Some(patch)) = (peak.as_mut(), detection.peak.as_ref()) {
            max_patch(full, patch, region.x, region.y);
        }
        observer.on_event(&DiffEvent::RegionAccepted { region });
    }

    Ok(CoarseOutcome::Changed(Detection { added, removed, peak }))
}

/// Per-pixel max of `patch` into `plane` with the patch's corner at `(x0, y0)`.
fn max_patch(plane: &mut GrayImage, patch: &GrayImage, x0: u32, y0: u32) {
    let (width, height) = plane.dimensions();
    for (x, y, value) in patch.enumerate_pixels() {
        let (tx, ty) = (x0 + x, y0 + y);
        if tx < width && ty < height {
            let dst = plane.get_pixel_mut(tx, ty);
            dst.0[0] = dst.0[0].max(value.0[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn with_black_box(mut image: RgbImage, x0: u32, y0: u32, side: u32) -> RgbImage {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        image
    }

    #[test]
    fn coarse_regions_scale_back_and_clip() {
        let coarse = Region { x: 2, y: 3, width: 4, height: 5, area: 12 };
        let full = to_full_resolution(&coarse, 4, 20, 100);
        assert_eq!((full.x, full.y, full.width, full.height), (8, 12, 12, 20));
        assert_eq!(full.area, 192);

        let outside = Region { x: 10, y: 0, width: 2, height: 2, area: 4 };
        assert!(to_full_resolution(&outside, 4, 20, 20).is_empty());
    }

    #[test]
    fn coarse_sensitivity_has_a_floor() {
        assert_eq!(coarse_sensitivity(4.0, 0.25), 1.0);
        assert_eq!(coarse_sensitivity(0.1, 0.25), MIN_COARSE_SENSITIVITY);
    }

    #[test]
    fn identical_pairs_short_circuit() {
        let image = white(200, 200);
        let settings = CoarseToFine::default();
        let outcome =
            coarse_to_fine(&image, &image, &Parameters::default(), &settings, &NoopObserver)
                .unwrap();
        assert!(matches!(
            outcome,
            CoarseOutcome::Equal { coarse_width: 50, coarse_height: 50, .. }
        ));
    }

    #[test]
    fn a_real_change_is_refined_at_full_resolution() {
        let old = white(200, 200);
        let new = with_black_box(white(200, 200), 80, 80, 40);
        let params = Parameters::default().with_sensitivity(5.0);
        let settings = CoarseToFine::default();
        let outcome = coarse_to_fine(&old, &new, &params, &settings, &NoopObserver).unwrap();
        let CoarseOutcome::Changed(detection) = outcome else {
            panic!("expected a change");
        };
        assert!(detection.removed.is_set(100, 100));
        assert!(!detection.removed.is_set(10, 10));
        assert!(detection.peak.is_none());
    }

    #[test]
    fn regions_inside_a_solid_change_are_kept() {
        // Every candidate crop here lies inside the black box, where the
        // full-resolution map is constant.
        let old = white(400, 400);
        let new = with_black_box(white(400, 400), 100, 100, 200);
        let params = Parameters::default().with_sensitivity(2.0);
        let settings = CoarseToFine::default();
        let outcome = coarse_to_fine(&old, &new, &params, &settings, &NoopObserver).unwrap();
        let CoarseOutcome::Changed(detection) = outcome else {
            panic!("expected a change");
        };
        assert!(!detection.removed.is_empty());
        assert!(detection.added.is_empty());
    }

    #[test]
    fn fine_pass_on_identical_images_is_empty() {
        let image = white(50, 50);
        let detection = fine_pass(&image, &image, &Parameters::default(), &NoopObserver).unwrap();
        assert!(detection.is_empty());
    }

    #[test]
    fn peak_is_kept_only_for_weighted_alpha() {
        let old = white(60, 60);
        let new = with_black_box(white(60, 60), 20, 20, 10);
        let weighted = Parameters::default().with_sensitivity(10.0).with_alpha_gamma(0.5);
        let detection = fine_pass(&old, &new, &weighted, &NoopObserver).unwrap();
        let peak = detection.peak.unwrap();
        // Pure lightness loss of 255 scores round(0.114 * 255) = 29 before the blur.
        let inside = peak.get_pixel(25, 25).0[0];
        assert!((28..=29).contains(&inside), "peak = {inside}");
        assert_eq!(peak.get_pixel(50, 50).0[0], 0);

        let unweighted = Parameters::default().with_sensitivity(10.0);
        let detection = fine_pass(&old, &new, &unweighted, &NoopObserver).unwrap();
        assert!(detection.peak.is_none());
    }
}
