// THEORY:
// The `pipeline` module is the top-level API of the comparison engine. It wires the
// stages of `core_modules` into one synchronous call:
//
//   strength maps -> adaptive threshold -> noise & shape filter
//     -> match merger -> overlay compositor -> metrics
//
// with the optional coarse-to-fine tiler standing in for the first three stages on
// large inputs.
//
// Key architectural principles:
// 1.  **Pure function**: `compare` holds no state between calls and takes its
//     inputs by reference. It is safe to call from any number of threads at once.
// 2.  **Eager validation**: Parameters and dimensions are checked before the first
//     buffer is allocated.
// 3.  **Stage-by-stage release**: Each intermediate buffer is dropped as soon as
//     the next stage has consumed it; strength maps survive only as a single peak
//     plane, and only when the overlay weights its alpha by strength. The final
//     category masks are handed back so other renderings need no second pass.
// 4.  **Observable, not chatty**: All progress goes to the caller's
//     `DiffObserver`. `compare` uses `NoopObserver`.
// 5.  **Alternative renderings**: `Comparison::outlined` traces the category
//     masks on the new image; `heatmap` skips detection altogether and shows the
//     raw difference magnitude.

use crate::core_modules::coarse_to_fine::{self, CoarseOutcome, Detection};
use crate::core_modules::color_distance::ensure_same_dimensions;
use crate::core_modules::match_merger;
use crate::core_modules::observer::{DiffEvent, DumpImage, DumpKind, NoopObserver, Stage};
use crate::core_modules::overlay;
use image::{RgbImage, RgbaImage};

// Re-export key data structures for the public API.
pub use crate::core_modules::error::CoreError;
pub use crate::core_modules::heatmap::heatmap;
pub use crate::core_modules::mask::BinaryMask;
pub use crate::core_modules::match_merger::MergedMasks;
pub use crate::core_modules::metrics::Metrics;
pub use crate::core_modules::observer::{DebugDumpDir, DiffObserver, LogObserver};
pub use crate::core_modules::parameters::{CoarseToFine, DistanceMode, Parameters, Rgb};
pub use crate::core_modules::regions::Region;

/// What is drawn for a compared pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Rendering {
    /// The RGBA category overlay.
    #[default]
    Overlay,
    /// Category outlines on an opaque copy of the new image.
    Outline { thickness: u32 },
    /// Undirected difference magnitude on the jet ramp.
    Heatmap,
}

/// The result of one comparison.
#[derive(Debug, Clone)]
pub struct Comparison {
    /// `new` with every changed pixel painted in its category color; alpha 0
    /// where nothing changed.
    pub overlay: RgbaImage,
    /// The mutually exclusive added, removed and matched masks.
    pub masks: MergedMasks,
    pub metrics: Metrics,
}

impl Comparison {
    /// `new` with the outer contour of every changed blob drawn in its category
    /// color, `thickness` pixels wide.
    pub fn outlined(
        &self,
        new: &RgbImage,
        params: &Parameters,
        thickness: u32,
    ) -> Result<RgbImage, CoreError> {
        overlay::outline(new, &self.masks, params, thickness)
    }
}

/// Compares two equal-sized images.
pub fn compare(
    old: &RgbImage,
    new: &RgbImage,
    params: &Parameters,
) -> Result<Comparison, CoreError> {
    compare_observed(old, new, params, &NoopObserver)
}

/// Compares two equal-sized images, reporting progress and debug buffers to
/// `observer`.
pub fn compare_observed(
    old: &RgbImage,
    new: &RgbImage,
    params: &Parameters,
    observer: &dyn DiffObserver,
) -> Result<Comparison, CoreError> {
    params.validate()?;
    ensure_same_dimensions(old, new)?;
    let (width, height) = old.dimensions();
    observer.on_event(&DiffEvent::Started { width, height, params });

    // --- 1. Detection (direct or coarse-to-fine) ---
    let detection = match &params.coarse_to_fine {
        None => coarse_to_fine::fine_pass(old, new, params, observer)?,
        Some(settings) => {
            match coarse_to_fine::coarse_to_fine(old, new, params, settings, observer)? {
                CoarseOutcome::Changed(detection) => detection,
                CoarseOutcome::Equal { .. } => {
                    let masks = empty_masks(width, height)?;
                    let overlay = overlay::compose(new, &masks, None, params)?;
                    let metrics = Metrics::equal(width, height);
                    return Ok(finish(masks, overlay, metrics, observer));
                }
            }
        }
    };
    let Detection { added, removed, peak } = detection;

    // --- 2. Match merging ---
    let masks = match_merger::merge(added, removed, params.match_tolerance)?;
    observer.on_event(&DiffEvent::StageFinished {
        stage: Stage::Merge,
        added: masks.added.count(),
        removed: masks.removed.count(),
        matched: masks.matched.count(),
    });

    // --- 3. Compositing ---
    let overlay = overlay::compose(new, &masks, peak.as_ref(), params)?;
    drop(peak);
    observer.on_event(&DiffEvent::StageFinished {
        stage: Stage::Overlay,
        added: masks.added.count(),
        removed: masks.removed.count(),
        matched: masks.matched.count(),
    });

    // --- 4. Metrics ---
    let metrics = Metrics::from_masks(&masks);
    Ok(finish(masks, overlay, metrics, observer))
}

fn empty_masks(width: u32, height: u32) -> Result<MergedMasks, CoreError> {
    Ok(MergedMasks {
        added: BinaryMask::empty(width, height)?,
        removed: BinaryMask::empty(width, height)?,
        matched: BinaryMask::empty(width, height)?,
    })
}

fn finish(
    masks: MergedMasks,
    overlay: RgbaImage,
    metrics: Metrics,
    observer: &dyn DiffObserver,
) -> Comparison {
    if observer.wants_dumps() {
        observer.dump(DumpKind::AddedMask, DumpImage::Gray(masks.added.as_image()));
        observer.dump(DumpKind::RemovedMask, DumpImage::Gray(masks.removed.as_image()));
        observer.dump(DumpKind::MatchedMask, DumpImage::Gray(masks.matched.as_image()));
        // A dump is best-effort; skip the alpha plane if it cannot be allocated.
        if let Ok(alpha) = overlay::alpha_plane(&overlay) {
            observer.dump(DumpKind::Alpha, DumpImage::Gray(&alpha));
        }
        observer.dump(DumpKind::Overlay, DumpImage::Rgba(&overlay));
    }
    observer.on_event(&DiffEvent::Finished { metrics: &metrics });
    Comparison { overlay, masks, metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb as Pixel;
    use proptest::prelude::*;
    use std::cell::RefCell;

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Pixel([255, 255, 255]))
    }

    fn with_black_square(mut image: RgbImage, x0: u32, y0: u32, side: u32) -> RgbImage {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Pixel([0, 0, 0]));
            }
        }
        image
    }

    fn percent_sum(m: &Metrics) -> f64 {
        m.same_percent + m.added_percent + m.removed_percent + m.matched_percent
    }

    fn shifted_squares() -> (RgbImage, RgbImage) {
        (
            with_black_square(white(50, 50), 10, 10, 20),
            with_black_square(white(50, 50), 13, 13, 20),
        )
    }

    #[derive(Default)]
    struct Recorder {
        short_circuits: RefCell<usize>,
        regions: RefCell<usize>,
        stages: RefCell<Vec<Stage>>,
    }

    impl DiffObserver for Recorder {
        fn on_event(&self, event: &DiffEvent<'_>) {
            match event {
                DiffEvent::CoarseShortCircuit { .. } => *self.short_circuits.borrow_mut() += 1,
                DiffEvent::RegionAccepted { .. } | DiffEvent::RegionRejected { .. } => {
                    *self.regions.borrow_mut() += 1
                }
                DiffEvent::StageFinished { stage, .. } => self.stages.borrow_mut().push(*stage),
                _ => {}
            }
        }
    }

    #[test]
    fn identical_white_images_report_no_change() {
        let image = white(100, 100);
        let result = compare(&image, &image, &Parameters::default()).unwrap();
        assert_eq!(result.metrics.added_percent, 0.0);
        assert_eq!(result.metrics.removed_percent, 0.0);
        assert_eq!(result.metrics.same_percent, 100.0);
        assert!(result.metrics.is_equal());
        assert!(result.overlay.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let err = compare(&white(10, 10), &white(10, 11), &Parameters::default()).unwrap_err();
        assert_eq!(
            err,
            CoreError::DimensionMismatch {
                old_width: 10,
                old_height: 10,
                new_width: 10,
                new_height: 11,
            }
        );
    }

    #[test]
    fn invalid_parameters_fail_before_any_work() {
        let params = Parameters::default().with_sensitivity(150.0);
        let err = compare(&white(10, 10), &white(10, 11), &params).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParameter { name: "sensitivity", .. }));
    }

    #[test]
    fn a_black_square_on_white_is_detected_where_it_is() {
        let old = white(100, 100);
        let new = with_black_square(white(100, 100), 30, 30, 40);
        let params = Parameters::default().with_sensitivity(1.0);
        let result = compare(&old, &new, &params).unwrap();

        assert!(result.metrics.diff_pixels > 0);
        let removed = params.removed_color.to_array();
        let center = result.overlay.get_pixel(50, 50).0;
        assert_eq!([center[0], center[1], center[2]], removed);
        assert_eq!(center[3], 255);
        // Far from the square nothing is painted.
        assert_eq!(result.overlay.get_pixel(5, 5).0, [255, 255, 255, 0]);
        assert_eq!(result.overlay.get_pixel(95, 95).0[3], 0);
    }

    #[test]
    fn a_shifted_square_is_matched_with_slivers_left_over() {
        let (old, new) = shifted_squares();
        let params = Parameters::default().with_sensitivity(5.0).with_match_tolerance(5);
        let result = compare(&old, &new, &params).unwrap();

        let metrics = result.metrics;
        assert!(metrics.matched_pixels > 0);
        assert!(metrics.added_pixels > 0);
        assert!(metrics.removed_pixels > 0);
        let m = &metrics;
        assert_eq!(
            m.same_pixels + m.added_pixels + m.removed_pixels + m.matched_pixels,
            m.total_pixels
        );
        assert!((percent_sum(&metrics) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_tolerance_never_matches() {
        let (old, new) = shifted_squares();
        let params = Parameters::default().with_sensitivity(5.0);
        let result = compare(&old, &new, &params).unwrap();
        assert_eq!(result.metrics.matched_pixels, 0);
        assert!(result.metrics.added_pixels > 0);
    }

    #[test]
    fn an_unbounded_match_tolerance_matches_the_whole_image() {
        let (old, new) = shifted_squares();
        let params = Parameters::default()
            .with_sensitivity(5.0)
            .with_match_tolerance(u32::MAX);
        let result = compare(&old, &new, &params).unwrap();
        assert_eq!(result.metrics.matched_pixels, result.metrics.total_pixels);
        assert_eq!(result.metrics.added_pixels, 0);
        assert_eq!(result.metrics.removed_pixels, 0);
    }

    #[test]
    fn an_unbounded_dilation_floods_without_double_counting() {
        let (old, new) = shifted_squares();
        let params = Parameters::default()
            .with_sensitivity(5.0)
            .with_dilation(u32::MAX);
        let result = compare(&old, &new, &params).unwrap();
        let m = result.metrics;
        assert_eq!(m.diff_pixels, m.total_pixels);
        assert_eq!(m.added_pixels + m.removed_pixels, m.total_pixels);
        assert!((percent_sum(&m) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn structural_mode_reports_everything_as_added() {
        let old = white(60, 60);
        let new = with_black_square(white(60, 60), 20, 20, 15);
        let params = Parameters::default()
            .with_mode(DistanceMode::Structural)
            .with_sensitivity(10.0);
        let result = compare(&old, &new, &params).unwrap();
        assert!(result.metrics.added_pixels > 0);
        assert_eq!(result.metrics.removed_pixels, 0);
    }

    #[test]
    fn rgb_mode_finds_the_square_too() {
        let old = white(100, 100);
        let new = with_black_square(white(100, 100), 30, 30, 40);
        let params = Parameters::default().with_mode(DistanceMode::Rgb);
        let result = compare(&old, &new, &params).unwrap();
        assert!(result.metrics.removed_pixels > 0);
        assert_eq!(result.metrics.added_pixels, 0);
        assert_eq!(result.overlay.get_pixel(50, 50).0[3], 255);
    }

    #[test]
    fn gamma_weighting_fades_pure_lightness_changes() {
        // Black ink on white scores 29 of 255, so gamma 2 leaves about
        // (29 / 255)^2 * 255 = 3 of opacity.
        let old = white(100, 100);
        let new = with_black_square(white(100, 100), 30, 30, 40);
        let params = Parameters::default().with_alpha_gamma(2.0);
        let result = compare(&old, &new, &params).unwrap();
        let alpha = result.overlay.get_pixel(50, 50).0[3];
        assert!((2..=4).contains(&alpha), "alpha = {alpha}");
        assert_eq!(result.overlay.get_pixel(5, 5).0[3], 0);
    }

    #[test]
    fn outlines_come_from_the_returned_masks() {
        let old = white(100, 100);
        let new = with_black_square(white(100, 100), 30, 30, 40);
        let params = Parameters::default();
        let result = compare(&old, &new, &params).unwrap();
        assert_eq!(Metrics::from_masks(&result.masks), result.metrics);

        let outlined = result.outlined(&new, &params, 2).unwrap();
        let removed = params.removed_color.to_array();
        assert_eq!(outlined.get_pixel(50, 50).0, [0, 0, 0]);
        assert_eq!(outlined.get_pixel(5, 5).0, [255, 255, 255]);
        assert!(outlined.pixels().any(|p| p.0 == removed));
    }

    #[test]
    fn zero_sized_images_are_entirely_same() {
        let empty = RgbImage::new(0, 0);
        let result = compare(&empty, &empty, &Parameters::default()).unwrap();
        assert_eq!(result.metrics.same_percent, 100.0);
        assert_eq!(result.metrics.total_pixels, 0);
    }

    #[test]
    fn large_identical_pairs_short_circuit_without_a_fine_pass() {
        let image = white(4000, 4000);
        let params = Parameters::default().with_coarse_to_fine(CoarseToFine::default());
        let recorder = Recorder::default();
        let result = compare_observed(&image, &image, &params, &recorder).unwrap();

        assert!(result.metrics.short_circuited);
        assert!(result.metrics.is_equal());
        assert_eq!(result.metrics.total_pixels, 16_000_000);
        assert_eq!(*recorder.short_circuits.borrow(), 1);
        assert_eq!(*recorder.regions.borrow(), 0);
        assert!(recorder.stages.borrow().is_empty());
    }

    #[test]
    fn coarse_to_fine_finds_the_same_square() {
        let old = white(400, 400);
        let new = with_black_square(white(400, 400), 120, 120, 160);
        let params = Parameters::default()
            .with_sensitivity(2.0)
            .with_coarse_to_fine(CoarseToFine::default());
        let recorder = Recorder::default();
        let result = compare_observed(&old, &new, &params, &recorder).unwrap();

        assert!(!result.metrics.short_circuited);
        assert!(result.metrics.removed_pixels > 0);
        assert_eq!(result.overlay.get_pixel(200, 200).0[3], 255);
        assert_eq!(result.overlay.get_pixel(10, 10).0[3], 0);
        assert!(*recorder.regions.borrow() >= 1);
    }

    #[test]
    fn direct_mode_reports_every_stage() {
        let old = white(40, 40);
        let new = with_black_square(white(40, 40), 10, 10, 10);
        let recorder = Recorder::default();
        compare_observed(&old, &new, &Parameters::default(), &recorder).unwrap();
        let expected = vec![
            Stage::Strength,
            Stage::Threshold,
            Stage::ShapeFilter,
            Stage::Merge,
            Stage::Overlay,
        ];
        assert_eq!(*recorder.stages.borrow(), expected);
    }

    #[test]
    fn debug_dump_dir_receives_all_buffers() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("debug");
        let old = white(30, 30);
        let new = with_black_square(white(30, 30), 5, 5, 10);
        let observer = (LogObserver::default(), DebugDumpDir::new(&dir));
        compare_observed(&old, &new, &Parameters::default(), &observer).unwrap();
        let expected = [
            "mask_add.png",
            "mask_del.png",
            "mask_matched.png",
            "alpha.png",
            "overlay_final.png",
        ];
        for name in expected {
            assert!(dir.join(name).is_file(), "missing {}", name);
        }
    }

    #[test]
    fn heatmap_is_available_next_to_compare() {
        let old = white(20, 20);
        let new = with_black_square(white(20, 20), 5, 5, 5);
        let map = heatmap(&old, &new, DistanceMode::Perceptual).unwrap();
        assert_eq!(map.get_pixel(7, 7).0, [128, 0, 0]);
        assert_eq!(map.get_pixel(15, 15).0, [0, 0, 128]);
    }

    fn small_image() -> impl Strategy<Value = RgbImage> {
        (4u32..20, 4u32..20).prop_flat_map(|(w, h)| {
            proptest::collection::vec(any::<[u8; 3]>(), (w * h) as usize).prop_map(move |pixels| {
                RgbImage::from_fn(w, h, |x, y| Pixel(pixels[(y * w + x) as usize]))
            })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn comparing_an_image_with_itself_finds_nothing(image in small_image()) {
            let result = compare(&image, &image, &Parameters::default().with_min_area(1)).unwrap();
            prop_assert_eq!(result.metrics.added_pixels, 0);
            prop_assert_eq!(result.metrics.removed_pixels, 0);
            prop_assert_eq!(result.metrics.matched_pixels, 0);
        }

        #[test]
        fn categories_partition_the_image(
            old in small_image(),
            seed in any::<u8>(),
            tolerance in 0u32..4,
            sensitivity in 1.0f64..60.0,
        ) {
            let new = RgbImage::from_fn(old.width(), old.height(), |x, y| {
                let p = old.get_pixel(x, y).0;
                Pixel([p[0] ^ seed, p[1], p[2].wrapping_add((x + y) as u8)])
            });
            let params = Parameters::default()
                .with_min_area(1)
                .with_sensitivity(sensitivity)
                .with_match_tolerance(tolerance);
            let result = compare(&old, &new, &params).unwrap();
            let m = result.metrics;
            let counted = m.same_pixels + m.added_pixels + m.removed_pixels + m.matched_pixels;
            prop_assert_eq!(counted, m.total_pixels);
            prop_assert!((percent_sum(&m) - 100.0).abs() < 1e-9);
        }
    }
}
