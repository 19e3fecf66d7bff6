// An example runner for the `overlay_diff` library.
//
// Logging is controlled with RUST_LOG (e.g. RUST_LOG=debug).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use overlay_diff::core_modules::utils::image_helper;
use overlay_diff::parallel_pipeline::{BatchConfig, BatchRunner, PairOutcome};
use overlay_diff::pipeline::{
    CoarseToFine, DebugDumpDir, DistanceMode, LogObserver, Parameters, Rendering,
    compare_observed, heatmap,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "overlay_diff")]
#[command(about = "Colored overlay diffs between two revisions of rendered drawings")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare one pair of images
    Compare {
        /// The earlier revision
        old: PathBuf,
        /// The later revision
        new: PathBuf,
        /// Output PNG file path
        output: PathBuf,

        /// Write intermediate masks and the final overlay into this directory
        #[arg(long)]
        debug_dir: Option<PathBuf>,

        #[command(flatten)]
        options: DiffOptions,
    },

    /// Compare every same-named image in two directories
    Batch {
        old_dir: PathBuf,
        new_dir: PathBuf,
        /// Directory receiving one PNG per pair
        output_dir: PathBuf,

        /// Pairs compared at the same time (defaults to one per CPU)
        #[arg(short, long)]
        workers: Option<usize>,

        #[command(flatten)]
        options: DiffOptions,
    },
}

#[derive(Args)]
struct DiffOptions {
    /// Percentage of the strongest differences kept
    #[arg(short, long, default_value = "1.0")]
    sensitivity: f64,

    /// Gaussian blur kernel on the strength maps (0 or 1 disables it)
    #[arg(long, default_value = "3")]
    blur: u32,

    /// Smallest change, in pixels, that is not noise
    #[arg(long, default_value = "20")]
    min_area: u32,

    /// Stroke thickening kernel size
    #[arg(long, default_value = "3")]
    dilation: u32,

    /// Alpha exponent; 1 paints every change fully opaque
    #[arg(long, default_value = "1.0")]
    gamma: f64,

    /// Pixel distance under which added and removed content count as matched
    #[arg(short = 't', long, default_value = "0")]
    match_tolerance: u32,

    /// How pixel differences are measured
    #[arg(long, value_enum, default_value_t = Distance::Lab)]
    distance: Distance,

    /// Run a quarter-resolution pass first and refine only where it found changes
    #[arg(long)]
    coarse: bool,

    /// What to write for each pair
    #[arg(short, long, value_enum, default_value_t = Mode::Overlay)]
    mode: Mode,

    /// Outline width in pixels (contours mode)
    #[arg(long, default_value = "2")]
    thickness: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Distance {
    Lab,
    Rgb,
    Ssim,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Overlay,
    Contours,
    Heatmap,
}

impl DiffOptions {
    fn params(&self) -> Parameters {
        let mode = match self.distance {
            Distance::Lab => DistanceMode::Perceptual,
            Distance::Rgb => DistanceMode::Rgb,
            Distance::Ssim => DistanceMode::Structural,
        };
        let params = Parameters::default()
            .with_sensitivity(self.sensitivity)
            .with_blur(self.blur)
            .with_min_area(self.min_area)
            .with_dilation(self.dilation)
            .with_alpha_gamma(self.gamma)
            .with_match_tolerance(self.match_tolerance)
            .with_mode(mode);
        if self.coarse {
            params.with_coarse_to_fine(CoarseToFine::default())
        } else {
            params
        }
    }

    fn rendering(&self) -> Rendering {
        match self.mode {
            Mode::Overlay => Rendering::Overlay,
            Mode::Contours => Rendering::Outline { thickness: self.thickness },
            Mode::Heatmap => Rendering::Heatmap,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Compare { old, new, output, debug_dir, options } => {
            run_single(old, new, output, debug_dir, &options)
        }
        Commands::Batch { old_dir, new_dir, output_dir, workers, options } => {
            run_batch(old_dir, new_dir, output_dir, workers, &options).await
        }
    }
}

fn run_single(
    old: PathBuf,
    new: PathBuf,
    out: PathBuf,
    debug: Option<PathBuf>,
    options: &DiffOptions,
) -> Result<()> {
    let load = |path: &PathBuf| {
        image_helper::load_rgb(path).with_context(|| format!("loading {}", path.display()))
    };
    let old_image = load(&old)?;
    let new_image = load(&new)?;
    let (old_image, new_image) = image_helper::reconcile_dimensions(&old_image, &new_image);

    let params = options.params();
    let log = LogObserver::new("overlay_diff");
    let comparison = match debug.map(DebugDumpDir::new) {
        Some(dump) => {
            info!("debug buffers go to {}", dump.dir().display());
            compare_observed(&old_image, &new_image, &params, &(log, dump))?
        }
        None => compare_observed(&old_image, &new_image, &params, &log)?,
    };

    let written = match options.rendering() {
        Rendering::Overlay => image_helper::save_overlay(&out, &comparison.overlay),
        Rendering::Outline { thickness } => {
            let outlined = comparison.outlined(&new_image, &params, thickness)?;
            image_helper::save_rgb(&out, &outlined)
        }
        Rendering::Heatmap => {
            image_helper::save_rgb(&out, &heatmap(&old_image, &new_image, params.mode)?)
        }
    };
    written.with_context(|| format!("writing {}", out.display()))?;

    let m = comparison.metrics;
    println!(
        "same {:.3}%  added {:.3}%  removed {:.3}%  matched {:.3}%  ({} of {} pixels differ)",
        m.same_percent,
        m.added_percent,
        m.removed_percent,
        m.matched_percent,
        m.diff_pixels,
        m.total_pixels
    );
    Ok(())
}

async fn run_batch(
    old_dir: PathBuf,
    new_dir: PathBuf,
    out_dir: PathBuf,
    workers: Option<usize>,
    options: &DiffOptions,
) -> Result<()> {
    let mut config = BatchConfig::new(out_dir)
        .with_params(options.params())
        .with_rendering(options.rendering());
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    let runner = BatchRunner::new(config);
    let (reports, summary) = runner.run_directories(&old_dir, &new_dir).await?;

    for report in &reports {
        let verdict = match &report.outcome {
            PairOutcome::Equal => "equal".to_string(),
            PairOutcome::Different(metrics) => format!("{} pixels differ", metrics.diff_pixels),
            PairOutcome::Failed(reason) => format!("failed: {}", reason),
        };
        println!("{} -> {}", report.pair.old.display(), verdict);
    }
    println!(
        "{} pairs: {} equal, {} different, {} failed",
        summary.total(),
        summary.equal,
        summary.different,
        summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(args: &[&str]) -> DiffOptions {
        let argv = ["overlay_diff", "compare", "a.png", "b.png", "out.png"];
        let cli = Cli::try_parse_from(argv.iter().chain(args).copied()).unwrap();
        match cli.command {
            Commands::Compare { options, .. } => options,
            Commands::Batch { .. } => panic!("parsed as batch"),
        }
    }

    #[test]
    fn defaults_match_the_library_defaults() {
        let options = options(&[]);
        assert_eq!(options.params(), Parameters::default());
        assert_eq!(options.rendering(), Rendering::Overlay);
    }

    #[test]
    fn detection_flags_reach_the_parameters() {
        let params = options(&[
            "--sensitivity", "2.5", "--blur", "1", "--min-area", "5", "--dilation", "7",
            "--gamma", "0.5", "-t", "4", "--distance", "rgb", "--coarse",
        ])
        .params();
        assert_eq!(params.sensitivity, 2.5);
        assert_eq!(params.blur, 1);
        assert_eq!(params.min_area, 5);
        assert_eq!(params.dilation, 7);
        assert_eq!(params.alpha_gamma, 0.5);
        assert_eq!(params.match_tolerance, 4);
        assert_eq!(params.mode, DistanceMode::Rgb);
        assert_eq!(params.coarse_to_fine, Some(CoarseToFine::default()));
    }

    #[test]
    fn render_modes_map_to_renderings() {
        let contours = options(&["--mode", "contours", "--thickness", "3"]);
        assert_eq!(contours.rendering(), Rendering::Outline { thickness: 3 });
        assert_eq!(options(&["-m", "heatmap"]).rendering(), Rendering::Heatmap);
        assert_eq!(options(&["--distance", "ssim"]).params().mode, DistanceMode::Structural);
    }

    #[test]
    fn batch_takes_directories_and_a_worker_count() {
        let argv = ["overlay_diff", "batch", "old", "new", "out", "-w", "3", "--mode", "heatmap"];
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Commands::Batch { old_dir, workers, options, .. } => {
                assert_eq!(old_dir, PathBuf::from("old"));
                assert_eq!(workers, Some(3));
                assert_eq!(options.rendering(), Rendering::Heatmap);
            }
            Commands::Compare { .. } => panic!("parsed as compare"),
        }
    }

    #[test]
    fn unknown_distance_names_are_rejected() {
        let argv = ["overlay_diff", "compare", "a", "b", "c", "--distance", "cie94"];
        assert!(Cli::try_parse_from(argv).is_err());
    }
}
