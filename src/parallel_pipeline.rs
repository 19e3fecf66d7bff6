// THEORY:
// The parallel pipeline compares many revision pairs at once, e.g. every sheet of
// a drawing set exported twice. `compare` itself is synchronous and CPU-bound, so
// the batch layer is a thin async shell around it:
//
// Key architectural principles:
// 1.  **Bounded Worker Pool**: A semaphore with `workers` permits (default: one per
//     CPU) limits how many pairs are in flight. Each pair runs on tokio's blocking
//     pool, so the async workers never stall on pixel work.
// 2.  **Pair Isolation**: A pair that fails to load, compare or save is reported as
//     `PairOutcome::Failed` and the rest of the batch carries on. Only failures of
//     the batch itself (an unreadable input directory, an output directory that
//     cannot be created) abort the run.
// 3.  **Size Reconciliation**: Revisions exported at different sizes are brought
//     to a common size before comparing, so a pair is never rejected for a
//     dimension mismatch.
// 4.  **Cooperative Cancellation**: Dropping the future returned by `run` stops
//     pairs that have not started; pairs already on the blocking pool finish.
// 5.  **Distinct Destinations**: Output names are assigned up front for the whole
//     batch. Pairs whose stems collide (`sheet.png` next to `sheet.bmp`) keep
//     their extensions in the name, so no two pairs ever write the same file.

use crate::core_modules::error::CoreError;
use crate::core_modules::metrics::Metrics;
use crate::core_modules::parameters::Parameters;
use crate::core_modules::utils::image_helper;
use crate::pipeline::{Rendering, compare, heatmap};
use futures::future::join_all;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("comparison task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Two revisions of the same image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    pub old: PathBuf,
    pub new: PathBuf,
}

impl ImagePair {
    pub fn new(old: impl Into<PathBuf>, new: impl Into<PathBuf>) -> Self {
        Self { old: old.into(), new: new.into() }
    }

    /// `<old_stem>__vs__<new_stem>_outline.png`
    pub fn output_name(&self) -> String {
        format!("{}__vs__{}_outline.png", stem(&self.old), stem(&self.new))
    }

    /// Like `output_name`, but with each file's extension folded into its label:
    /// `sheet_png__vs__sheet_png_outline.png`.
    pub fn qualified_output_name(&self) -> String {
        format!("{}__vs__{}_outline.png", label(&self.old), label(&self.new))
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn label(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().replace('.', "_"))
        .unwrap_or_default()
}

/// One output file name per pair, never repeated within the batch. Pairs sharing
/// a stem-based name all switch to their qualified name; any clash left after
/// that gets a numbered suffix.
pub fn output_names(pairs: &[ImagePair]) -> Vec<String> {
    let mut stem_uses: HashMap<String, usize> = HashMap::new();
    for pair in pairs {
        *stem_uses.entry(pair.output_name()).or_default() += 1;
    }

    let mut taken = HashSet::new();
    pairs
        .iter()
        .map(|pair| {
            let plain = pair.output_name();
            let base = if stem_uses[&plain] > 1 { pair.qualified_output_name() } else { plain };
            let mut name = base.clone();
            let mut n = 1;
            while !taken.insert(name.clone()) {
                n += 1;
                name = format!("{}_{}.png", base.trim_end_matches(".png"), n);
            }
            name
        })
        .collect()
}

/// Pairs every image in `old_dir` with the file of the same name in `new_dir`,
/// sorted by file name. Images without a counterpart are skipped.
pub fn pair_directories(old_dir: &Path, new_dir: &Path) -> Result<Vec<ImagePair>, BatchError> {
    let io_error = |source| BatchError::Io { path: old_dir.to_path_buf(), source };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(old_dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_file() && image_helper::is_image_path(&path) {
            if let Some(name) = path.file_name() {
                names.push(name.to_os_string());
            }
        }
    }
    names.sort();

    Ok(names
        .into_iter()
        .filter_map(|name| {
            let counterpart = new_dir.join(&name);
            counterpart
                .is_file()
                .then(|| ImagePair::new(old_dir.join(&name), counterpart))
        })
        .collect())
}

/// Configuration for a `BatchRunner`.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum number of pairs compared at the same time.
    pub workers: usize,
    /// Directory receiving one overlay PNG per pair.
    pub output_dir: PathBuf,
    pub params: Parameters,
    /// What is written for each pair.
    pub rendering: Rendering,
}

impl BatchConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            workers: num_cpus::get(),
            output_dir: output_dir.into(),
            params: Parameters::default(),
            rendering: Rendering::Overlay,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_params(mut self, params: Parameters) -> Self {
        self.params = params;
        self
    }

    pub fn with_rendering(mut self, rendering: Rendering) -> Self {
        self.rendering = rendering;
        self
    }
}

/// The verdict for one pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Equal,
    Different(Metrics),
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub pair: ImagePair,
    /// Where the rendering was written; `None` when the pair failed.
    pub output: Option<PathBuf>,
    pub outcome: PairOutcome,
}

/// Aggregated counts over a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub equal: usize,
    pub different: usize,
    pub failed: usize,
    /// Sum of `diff_pixels` over all different pairs.
    pub diff_pixels: u64,
}

impl BatchSummary {
    pub fn from_reports(reports: &[PairReport]) -> Self {
        reports.iter().fold(Self::default(), |mut summary, report| {
            match &report.outcome {
                PairOutcome::Equal => summary.equal += 1,
                PairOutcome::Different(metrics) => {
                    summary.different += 1;
                    summary.diff_pixels += metrics.diff_pixels;
                }
                PairOutcome::Failed(_) => summary.failed += 1,
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.equal + self.different + self.failed
    }
}

/// Compares image pairs concurrently on a bounded pool.
pub struct BatchRunner {
    config: Arc<BatchConfig>,
    permits: Arc<Semaphore>,
}

impl BatchRunner {
    pub fn new(config: BatchConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            config: Arc::new(config),
            permits,
        }
    }

    /// Compares every pair and returns the per-pair reports, in input order, with
    /// their summary.
    pub async fn run(
        &self,
        pairs: Vec<ImagePair>,
    ) -> Result<(Vec<PairReport>, BatchSummary), BatchError> {
        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|source| BatchError::Io { path: output_dir.clone(), source })?;

        let names = output_names(&pairs);
        let tasks = pairs
            .into_iter()
            .zip(names)
            .map(|(pair, name)| self.run_pair(pair, output_dir.join(name)));
        let reports = join_all(tasks).await;
        let summary = BatchSummary::from_reports(&reports);
        info!(
            "batch finished: {} equal, {} different, {} failed",
            summary.equal, summary.different, summary.failed
        );
        Ok((reports, summary))
    }

    /// Pairs two directories by file name and runs the batch.
    pub async fn run_directories(
        &self,
        old_dir: &Path,
        new_dir: &Path,
    ) -> Result<(Vec<PairReport>, BatchSummary), BatchError> {
        let pairs = pair_directories(old_dir, new_dir)?;
        info!("found {} pairs in {} and {}", pairs.len(), old_dir.display(), new_dir.display());
        self.run(pairs).await
    }

    async fn run_pair(&self, pair: ImagePair, output: PathBuf) -> PairReport {
        let result = match self.permits.clone().acquire_owned().await {
            Ok(permit) => {
                let config = Arc::clone(&self.config);
                let task_pair = pair.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    compare_pair(&task_pair, &config, output)
                });
                handle.await.map_err(BatchError::from).and_then(|result| result)
            }
            Err(closed) => Err(BatchError::Io {
                path: pair.old.clone(),
                source: std::io::Error::other(closed),
            }),
        };

        match result {
            Ok((outcome, output)) => {
                match &outcome {
                    PairOutcome::Equal => info!("{}: equal", pair.old.display()),
                    PairOutcome::Different(metrics) => info!(
                        "{}: {} pixels differ ({:.3}%)",
                        pair.old.display(),
                        metrics.diff_pixels,
                        100.0 - metrics.same_percent
                    ),
                    PairOutcome::Failed(_) => {}
                }
                PairReport { pair, output: Some(output), outcome }
            }
            Err(err) => {
                warn!("{}: {}", pair.old.display(), err);
                PairReport {
                    pair,
                    output: None,
                    outcome: PairOutcome::Failed(err.to_string()),
                }
            }
        }
    }
}

/// Loads, reconciles, compares and writes the rendering of one pair to `output`.
fn compare_pair(
    pair: &ImagePair,
    config: &BatchConfig,
    output: PathBuf,
) -> Result<(PairOutcome, PathBuf), BatchError> {
    let load = |path: &Path| {
        image_helper::load_rgb(path)
            .map_err(|source| BatchError::Image { path: path.to_path_buf(), source })
    };
    let old = load(&pair.old)?;
    let new = load(&pair.new)?;
    let (old, new) = image_helper::reconcile_dimensions(&old, &new);

    let params = &config.params;
    let comparison = compare(&old, &new, params)?;
    let written = match config.rendering {
        Rendering::Overlay => image_helper::save_overlay(&output, &comparison.overlay),
        Rendering::Outline { thickness } => {
            image_helper::save_rgb(&output, &comparison.outlined(&new, params, thickness)?)
        }
        Rendering::Heatmap => image_helper::save_rgb(&output, &heatmap(&old, &new, params.mode)?),
    };
    written.map_err(|source| BatchError::Image { path: output.clone(), source })?;

    let outcome = if comparison.metrics.is_equal() {
        PairOutcome::Equal
    } else {
        PairOutcome::Different(comparison.metrics)
    };
    Ok((outcome, output))
}
