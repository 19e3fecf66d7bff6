// THEORY:
// This file is the main entry point for the `overlay_diff` library crate.
// It exposes the comparison engine as two layers:
//
// 1.  `pipeline`: the synchronous, stateless `compare` function. Two decoded
//     images and a `Parameters` value go in; a colored RGBA overlay and a
//     `Metrics` summary come out. Everything between (color distance, adaptive
//     threshold, noise filtering, match merging, compositing) lives in
//     `core_modules` and is reachable for callers who need a single stage.
// 2.  `parallel_pipeline`: a tokio-based batch runner that pairs up two
//     directories of revisions and compares every pair on a bounded worker pool,
//     writing one overlay file per pair.
//
// The library never installs a logger and never prints. Progress is reported to
// an explicit `DiffObserver`; the batch layer logs through the `log` facade.

pub mod core_modules;
pub mod pipeline;
pub mod parallel_pipeline;

pub use pipeline::{Comparison, compare, compare_observed, heatmap};
