//! JSON persistence and plain-text summaries.

use std::fmt;
use std::fs;
use std::path::Path;

use itertools::Itertools;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::SamplingMode;
use crate::data::output::{FrameUncertainty, UncertaintyRecord};
use crate::error::{Error, Result};
use crate::evaluation::EvaluationReport;
use crate::stats::Summary;
use crate::temperature::TemperatureFit;

pub const UNCERTAINTY_RESULTS_FILE: &str = "uncertainty_results.json";
pub const UNCERTAINTY_SUMMARY_FILE: &str = "uncertainty_summary.txt";
pub const EVALUATION_METRICS_FILE: &str = "uncertainty_metrics.json";
pub const EVALUATION_SUMMARY_FILE: &str = "evaluation_summary.txt";

/// Pretty-prints `value` to `path`, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    create_parent(path)?;
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    tracing::debug!(path = %path.display(), "wrote json");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.is_file() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

pub fn write_text(path: &Path, text: &str) -> Result<()> {
    create_parent(path)?;
    fs::write(path, text)?;
    Ok(())
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

/// Distribution of every uncertainty statistic over a batch of frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UncertaintySummary {
    pub mode: SamplingMode,
    /// Smallest and largest N over frames that had sample sets.
    pub samples_per_frame: Option<(usize, usize)>,
    pub num_frames: usize,
    pub total_detections: usize,
    pub score_variance: Summary,
    pub score_std: Summary,
    pub box_variance: Summary,
    pub model_disagreement: Summary,
    pub epistemic_uncertainty: Summary,
    pub predictive_entropy: Summary,
    pub detection_frequency: Summary,
}
impl UncertaintySummary {
    pub fn from_frames(frames: &[FrameUncertainty], mode: SamplingMode) -> Self {
        let records: Vec<&UncertaintyRecord> = frames.iter().flat_map(|f| f.records.iter()).collect();
        let samples_per_frame = frames
            .iter()
            .map(|f| f.num_sample_sets)
            .filter(|&n| n > 0)
            .minmax()
            .into_option();
        let of = |stat: fn(&UncertaintyRecord) -> f64| {
            Summary::of(&records.iter().map(|r| stat(r)).collect::<Vec<_>>())
        };
        Self {
            mode,
            samples_per_frame,
            num_frames: frames.len(),
            total_detections: records.len(),
            score_variance: of(|r| r.score_variance),
            score_std: of(|r| r.score_std),
            box_variance: of(|r| r.box_variance),
            model_disagreement: of(|r| r.model_disagreement),
            epistemic_uncertainty: of(|r| r.epistemic_uncertainty),
            predictive_entropy: of(|r| r.predictive_entropy),
            detection_frequency: of(|r| r.detection_frequency),
        }
    }

    fn rows(&self) -> [(&'static str, &Summary); 7] {
        [
            ("Score variance", &self.score_variance),
            ("Score std", &self.score_std),
            ("Box variance", &self.box_variance),
            ("Model disagreement", &self.model_disagreement),
            ("Epistemic uncertainty", &self.epistemic_uncertainty),
            ("Predictive entropy", &self.predictive_entropy),
            ("Detection frequency", &self.detection_frequency),
        ]
    }
}

impl fmt::Display for UncertaintySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Uncertainty Quantification Results")?;
        writeln!(f, "==================================")?;
        writeln!(f, "Mode: {}", self.mode)?;
        match self.samples_per_frame {
            Some((lo, hi)) if lo == hi => writeln!(f, "Samples per frame: {}", lo)?,
            Some((lo, hi)) => writeln!(f, "Samples per frame: {} to {}", lo, hi)?,
            None => writeln!(f, "Samples per frame: none")?,
        }
        writeln!(f, "Frames: {}", self.num_frames)?;
        writeln!(f, "Total detections: {}", self.total_detections)?;
        for (name, summary) in self.rows() {
            writeln!(f)?;
            writeln!(f, "{}:", name)?;
            writeln!(f, "  Mean: {:.6}", summary.mean)?;
            writeln!(f, "  Std:  {:.6}", summary.std)?;
            writeln!(f, "  Min:  {:.6}", summary.min)?;
            writeln!(f, "  Max:  {:.6}", summary.max)?;
        }
        Ok(())
    }
}

pub fn render_evaluation_summary(report: &EvaluationReport) -> String {
    EvaluationSummary(report).to_string()
}

struct EvaluationSummary<'a>(&'a EvaluationReport);

impl fmt::Display for EvaluationSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        writeln!(f, "Uncertainty Calibration Evaluation")?;
        writeln!(f, "==================================")?;
        writeln!(f, "IoU threshold: {}", r.iou_threshold)?;
        writeln!(f, "Uncertainty source: {}", r.uncertainty_source)?;
        writeln!(f)?;
        writeln!(f, "Total predictions: {}", r.total_predictions)?;
        writeln!(f, "True positives: {}", r.true_positives)?;
        writeln!(f, "False positives: {}", r.false_positives)?;
        writeln!(f, "Precision: {:.4}", r.precision)?;
        writeln!(f)?;
        writeln!(f, "Calibration:")?;
        writeln!(f, "  ECE:   {:.4}", r.ece)?;
        writeln!(f, "  MCE:   {:.4}", r.mce)?;
        writeln!(f, "  Brier: {:.4}", r.brier_score)?;
        if !r.class_calibration.is_empty() {
            writeln!(f, "  Classwise ECE: {:.4}", r.classwise_ece)?;
            for class in &r.class_calibration {
                match class.object_type {
                    Some(object_type) => write!(f, "    {}", object_type)?,
                    None => write!(f, "    label {}", class.label)?,
                }
                writeln!(f, ": ECE {:.4}, precision {:.4} over {}", class.ece, class.precision, class.count)?;
            }
        }
        writeln!(f)?;
        writeln!(f, "Error detection:")?;
        writeln!(f, "  AUROC:    {:.4}", r.auroc)?;
        writeln!(f, "  Spearman: {:.4}", r.spearman_correlation)?;
        writeln!(f, "  Pearson:  {:.4}", r.pearson_correlation)?;
        writeln!(f)?;
        writeln!(f, "Average confidence: {:.4}", r.avg_confidence)?;
        writeln!(f, "Average uncertainty: {:.6}", r.avg_uncertainty)?;
        Ok(())
    }
}

pub fn render_temperature_fit(fit: &TemperatureFit) -> String {
    let mut lines: Vec<String> = fit
        .trials
        .iter()
        .map(|t| {
            format!(
                "restart {:>2}: T {:.4} -> {:.4}, {} {:.6}",
                t.restart, t.initial_temperature, t.temperature, fit.objective_kind, t.objective
            )
        })
        .collect();
    lines.push(format!(
        "best: T {:.4}, {} {:.6} over {} predictions ({} activation)",
        fit.temperature, fit.objective_kind, fit.objective, fit.num_predictions, fit.activation
    ));
    lines.join("\n")
}
