// THEORY:
// The comparison core is silent: it neither logs nor writes files. Anything a
// caller wants to see while a comparison runs (stage progress, the coarse
// pre-pass verdict, the intermediate masks) is handed to an explicit
// `DiffObserver` passed into the call. There is no global logger state and no
// debug flag inside the core; a caller that passes `NoopObserver` pays nothing.
//
// Key architectural principles:
// 1.  **Events, not strings**: The core emits structured `DiffEvent`s. How they
//     are rendered (log lines, counters, a progress bar) is the observer's call.
// 2.  **Opt-in dumps**: Debug buffers are only materialised when the observer
//     says it wants them (`wants_dumps`), since building the alpha plane costs a
//     full-size allocation.
// 3.  **Never fatal**: Observers return nothing. A dump that fails to write is
//     logged and forgotten; it never changes the comparison's result.
// 4.  **Composable**: A pair `(A, B)` is itself an observer and forwards to both,
//     so logging and dumping can be combined without a dedicated type.

use crate::core_modules::metrics::Metrics;
use crate::core_modules::parameters::Parameters;
use crate::core_modules::regions::Region;
use crate::core_modules::utils::image_helper;
use image::{GrayImage, RgbaImage};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// A pipeline stage that reports its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Strength,
    Threshold,
    ShapeFilter,
    Merge,
    Overlay,
}

/// Progress notifications emitted by the comparison core.
#[derive(Debug, Clone, Copy)]
pub enum DiffEvent<'a> {
    Started {
        width: u32,
        height: u32,
        params: &'a Parameters,
    },
    /// Nonzero pixel counts of the category masks after a stage. Stages that run
    /// before the merger report `matched` as 0.
    StageFinished {
        stage: Stage,
        added: usize,
        removed: usize,
        matched: usize,
    },
    /// The coarse pre-pass found too little change and the fine pass was skipped.
    CoarseShortCircuit {
        coarse_width: u32,
        coarse_height: u32,
        changed_ratio: f64,
    },
    /// A coarse region was refined at full resolution and kept.
    RegionAccepted { region: Region },
    /// A coarse region held no change at full resolution.
    RegionRejected { region: Region },
    Finished { metrics: &'a Metrics },
}

/// Identifies one of the debug buffers offered to `DiffObserver::dump`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    AddedMask,
    RemovedMask,
    MatchedMask,
    Alpha,
    Overlay,
}

impl DumpKind {
    pub fn file_name(self) -> &'static str {
        match self {
            DumpKind::AddedMask => "mask_add.png",
            DumpKind::RemovedMask => "mask_del.png",
            DumpKind::MatchedMask => "mask_matched.png",
            DumpKind::Alpha => "alpha.png",
            DumpKind::Overlay => "overlay_final.png",
        }
    }
}

/// A debug buffer handed to an observer.
#[derive(Debug, Clone, Copy)]
pub enum DumpImage<'a> {
    Gray(&'a GrayImage),
    Rgba(&'a RgbaImage),
}

/// Receives progress from a comparison.
pub trait DiffObserver {
    fn on_event(&self, event: &DiffEvent<'_>);

    /// Whether `dump` should be called at all.
    fn wants_dumps(&self) -> bool {
        false
    }

    fn dump(&self, _kind: DumpKind, _image: DumpImage<'_>) {}
}

/// Ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl DiffObserver for NoopObserver {
    fn on_event(&self, _event: &DiffEvent<'_>) {}
}

/// Forwards events to the `log` facade under the given target.
#[derive(Debug, Clone)]
pub struct LogObserver {
    target: String,
}

impl LogObserver {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new(module_path!())
    }
}

impl DiffObserver for LogObserver {
    fn on_event(&self, event: &DiffEvent<'_>) {
        let target = self.target.as_str();
        match *event {
            DiffEvent::Started { width, height, params } => {
                debug!(
                    target: target,
                    "comparing {}x{} (sensitivity {}, mode {:?})",
                    width, height, params.sensitivity, params.mode
                );
            }
            DiffEvent::StageFinished { stage, added, removed, matched } => {
                debug!(
                    target: target,
                    "{:?}: added={} removed={} matched={}",
                    stage, added, removed, matched
                );
            }
            DiffEvent::CoarseShortCircuit { coarse_width, coarse_height, changed_ratio } => {
                info!(
                    target: target,
                    "coarse pass {}x{} changed ratio {:.5}, treating pair as equal",
                    coarse_width, coarse_height, changed_ratio
                );
            }
            DiffEvent::RegionAccepted { region } => {
                debug!(target: target, "region accepted: {:?}", region);
            }
            DiffEvent::RegionRejected { region } => {
                debug!(target: target, "region rejected: {:?}", region);
            }
            DiffEvent::Finished { metrics } => {
                info!(
                    target: target,
                    "done: added {:.3}% removed {:.3}% matched {:.3}% ({} of {} pixels differ)",
                    metrics.added_percent,
                    metrics.removed_percent,
                    metrics.matched_percent,
                    metrics.diff_pixels,
                    metrics.total_pixels
                );
            }
        }
    }
}

/// Writes every debug buffer as a PNG into a directory.
#[derive(Debug, Clone)]
pub struct DebugDumpDir {
    dir: PathBuf,
}

impl DebugDumpDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl DiffObserver for DebugDumpDir {
    fn on_event(&self, _event: &DiffEvent<'_>) {}

    fn wants_dumps(&self) -> bool {
        true
    }

    fn dump(&self, kind: DumpKind, image: DumpImage<'_>) {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            warn!("cannot create debug directory {}: {}", self.dir.display(), err);
            return;
        }
        let path = self.dir.join(kind.file_name());
        let written = match image {
            DumpImage::Gray(plane) => image_helper::save_gray(&path, plane),
            DumpImage::Rgba(overlay) => image_helper::save_overlay(&path, overlay),
        };
        if let Err(err) = written {
            warn!("failed to write debug buffer {}: {}", path.display(), err);
        }
    }
}

impl<A: DiffObserver, B: DiffObserver> DiffObserver for (A, B) {
    fn on_event(&self, event: &DiffEvent<'_>) {
        self.0.on_event(event);
        self.1.on_event(event);
    }

    fn wants_dumps(&self) -> bool {
        self.0.wants_dumps() || self.1.wants_dumps()
    }

    fn dump(&self, kind: DumpKind, image: DumpImage<'_>) {
        if self.0.wants_dumps() {
            self.0.dump(kind, image);
        }
        if self.1.wants_dumps() {
            self.1.dump(kind, image);
        }
    }
}

impl<T: DiffObserver + ?Sized> DiffObserver for &T {
    fn on_event(&self, event: &DiffEvent<'_>) {
        (**self).on_event(event);
    }

    fn wants_dumps(&self) -> bool {
        (**self).wants_dumps()
    }

    fn dump(&self, kind: DumpKind, image: DumpImage<'_>) {
        (**self).dump(kind, image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<String>>,
        dumps: RefCell<Vec<DumpKind>>,
    }

    impl DiffObserver for Recorder {
        fn on_event(&self, event: &DiffEvent<'_>) {
            self.events.borrow_mut().push(format!("{:?}", event));
        }

        fn wants_dumps(&self) -> bool {
            true
        }

        fn dump(&self, kind: DumpKind, _image: DumpImage<'_>) {
            self.dumps.borrow_mut().push(kind);
        }
    }

    #[test]
    fn pairs_fan_out_to_both_members() {
        let pair = (Recorder::default(), NoopObserver);
        let metrics = Metrics::default();
        pair.on_event(&DiffEvent::Finished { metrics: &metrics });
        let plane = GrayImage::new(1, 1);
        assert!(pair.wants_dumps());
        pair.dump(DumpKind::Alpha, DumpImage::Gray(&plane));
        assert_eq!(pair.0.events.borrow().len(), 1);
        assert_eq!(*pair.0.dumps.borrow(), vec![DumpKind::Alpha]);
    }

    #[test]
    fn noop_observer_wants_no_dumps() {
        assert!(!NoopObserver.wants_dumps());
        assert!(!LogObserver::default().wants_dumps());
    }

    #[test]
    fn dump_dir_writes_named_files() {
        let scratch = tempfile::tempdir().unwrap();
        let sink = DebugDumpDir::new(scratch.path().join("dumps"));
        let mut plane = GrayImage::new(2, 2);
        plane.put_pixel(0, 0, Luma([255]));
        sink.dump(DumpKind::AddedMask, DumpImage::Gray(&plane));
        sink.dump(DumpKind::Overlay, DumpImage::Rgba(&RgbaImage::new(2, 2)));
        assert!(sink.dir().join("mask_add.png").is_file());
        assert!(sink.dir().join("overlay_final.png").is_file());
    }

    #[test]
    fn unwritable_dump_dir_is_not_fatal() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("not_a_dir");
        std::fs::write(&file, b"x").unwrap();
        let sink = DebugDumpDir::new(file.join("nested"));
        sink.dump(DumpKind::Alpha, DumpImage::Gray(&GrayImage::new(1, 1)));
        assert!(!file.join("nested").exists());
    }
}
