// The comparison core, leaves first: every stage is a pure function over buffers
// owned by the call.

pub mod color_space;
pub mod color_distance;
pub mod structural_similarity;
pub mod threshold;
pub mod mask;
pub mod morphology;
pub mod regions;
pub mod match_merger;
pub mod downscale;
pub mod coarse_to_fine;
pub mod overlay;
pub mod heatmap;
pub mod metrics;
pub mod error;
pub mod parameters;
pub mod observer;
pub mod utils;
