//! det3d-uncertainty CLI: cross-sample uncertainty, calibration metrics and
//! temperature search for 3-D detectors.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};

use det3d_uncertainty::data::input::{load_ground_truth, FrameSamples, RawFramePredictions};
use det3d_uncertainty::data::output::FrameUncertainty;
use det3d_uncertainty::report::{self, UncertaintySummary};
use det3d_uncertainty::{EngineConfig, Error, Label, ObjectType};

#[derive(Parser)]
#[command(name = "det3d-uncertainty")]
#[command(about = "Uncertainty aggregation and calibration for sampled 3-D detections")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match sample sets per frame and write uncertainty records.
    Aggregate(AggregateArgs),

    /// Score uncertainty records against KITTI ground truth.
    Evaluate(EvaluateArgs),

    /// Search the temperature that calibrates raw class scores.
    Calibrate(CalibrateArgs),
}

#[derive(Debug, Clone, Args)]
struct AggregateArgs {
    /// JSON list of frames, each with its sample sets.
    #[arg(long)]
    samples: PathBuf,

    #[arg(long)]
    out_dir: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// Uncertainty records written by `aggregate`.
    #[arg(long)]
    results: PathBuf,

    /// Directory with one KITTI label file per frame.
    #[arg(long)]
    gt_dir: PathBuf,

    #[arg(long)]
    out_dir: PathBuf,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `evaluation.iou_threshold`.
    #[arg(long)]
    iou_threshold: Option<f64>,

    /// Overrides `evaluation.num_bins`.
    #[arg(long)]
    num_bins: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// JSON list of frames with boxes and raw class scores.
    #[arg(long)]
    predictions: PathBuf,

    #[arg(long)]
    gt_dir: PathBuf,

    /// Class name of every logit column, in order.
    #[arg(long, value_delimiter = ',', default_value = "Car,Pedestrian,Cyclist")]
    classes: Vec<ObjectType>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the fit (JSON).
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Aggregate(args) => run_aggregate(&args),
        Commands::Evaluate(args) => run_evaluate(&args),
        Commands::Calibrate(args) => run_calibrate(&args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn require_file(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        return Err(Error::MissingInput(path.to_path_buf()).into());
    }
    Ok(())
}

fn require_dir(path: &Path) -> anyhow::Result<()> {
    if !path.is_dir() {
        return Err(Error::MissingGroundTruth(path.to_path_buf()).into());
    }
    Ok(())
}

fn run_aggregate(args: &AggregateArgs) -> anyhow::Result<()> {
    require_file(&args.samples)?;
    let config = load_config(args.config.as_deref())?;
    let engine = config.engine()?;

    let frames: Vec<FrameSamples> = report::read_json(&args.samples)?;
    match config.num_samples {
        Some(n) => tracing::info!("Loaded {} frames ({}, {} samples declared)", frames.len(), config.mode, n),
        None => tracing::info!("Loaded {} frames ({})", frames.len(), config.mode),
    }
    let results = engine.process_frames(&frames);

    let summary = UncertaintySummary::from_frames(&results, config.mode);
    report::write_json(&args.out_dir.join(report::UNCERTAINTY_RESULTS_FILE), &results)?;
    report::write_text(
        &args.out_dir.join(report::UNCERTAINTY_SUMMARY_FILE),
        &summary.to_string(),
    )?;
    println!("{}", summary);
    tracing::info!("Results written to {}", args.out_dir.display());
    Ok(())
}

fn run_evaluate(args: &EvaluateArgs) -> anyhow::Result<()> {
    require_file(&args.results)?;
    require_dir(&args.gt_dir)?;
    let mut config = load_config(args.config.as_deref())?;
    if let Some(iou_threshold) = args.iou_threshold {
        config.evaluation.iou_threshold = iou_threshold;
    }
    if let Some(num_bins) = args.num_bins {
        config.evaluation.num_bins = num_bins;
    }
    config.validate()?;
    let evaluator = config.evaluator()?;

    let frames: Vec<FrameUncertainty> = report::read_json(&args.results)?;
    let frame_ids: Vec<String> = frames.iter().map(|f| f.frame_id.clone()).collect();
    let gts = load_ground_truth(&args.gt_dir, &frame_ids)?;
    let metrics = evaluator.evaluate(&frames, &gts)?;

    let summary = report::render_evaluation_summary(&metrics);
    report::write_json(&args.out_dir.join(report::EVALUATION_METRICS_FILE), &metrics)?;
    report::write_text(&args.out_dir.join(report::EVALUATION_SUMMARY_FILE), &summary)?;
    println!("{}", summary);
    Ok(())
}

fn run_calibrate(args: &CalibrateArgs) -> anyhow::Result<()> {
    require_file(&args.predictions)?;
    require_dir(&args.gt_dir)?;
    if args.classes.is_empty() {
        bail!("--classes needs at least one class name");
    }
    let config = load_config(args.config.as_deref())?;
    let calibrator = config.calibrator()?;
    let evaluator = config.temperature_evaluator()?;

    let frames: Vec<RawFramePredictions> = report::read_json(&args.predictions)?;
    let frame_ids: Vec<String> = frames.iter().map(|f| f.frame_id.clone()).collect();
    let gts = load_ground_truth(&args.gt_dir, &frame_ids)?;
    let class_labels: Vec<Label> = args.classes.iter().map(|c| c.label()).collect();

    let fit = calibrator.fit_frames(&evaluator, &frames, &gts, &class_labels)?;
    println!("{}", report::render_temperature_fit(&fit));
    if let Some(out) = &args.out {
        report::write_json(out, &fit)?;
        tracing::info!("Fit written to {}", out.display());
    }
    Ok(())
}
