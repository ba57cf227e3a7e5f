//! Calibration and error-detection metrics against ground truth.
//!
//! Predictions of every frame are matched class-aware against the frame's
//! annotation, then pooled. All metric functions accept empty input and
//! return the neutral value (0, or 0.5 for AUROC).

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::data::{
    input::GroundTruthAnnotation, output::FrameUncertainty, output::UncertaintyRecord, Box3D, Label,
    ObjectType,
};
use crate::error::{check_positive, check_unit_interval, Error, Result};
use crate::overlap::{BoxOverlap, Iou3d};
use crate::stats::{auroc, mean, pearson, spearman};

/// Record statistic used as the uncertainty scalar of a prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum UncertaintySource {
    ScoreVariance,
    ScoreStd,
    BoxVariance,
    ModelDisagreement,
    Epistemic,
    PredictiveEntropy,
    /// `1 - score`, for detectors without sampling.
    InverseConfidence,
}
impl UncertaintySource {
    pub fn of(self, record: &UncertaintyRecord) -> f64 {
        match self {
            UncertaintySource::ScoreVariance => record.score_variance,
            UncertaintySource::ScoreStd => record.score_std,
            UncertaintySource::BoxVariance => record.box_variance,
            UncertaintySource::ModelDisagreement => record.model_disagreement,
            UncertaintySource::Epistemic => record.epistemic_uncertainty,
            UncertaintySource::PredictiveEntropy => record.predictive_entropy,
            UncertaintySource::InverseConfidence => 1.0 - record.score,
        }
    }
}

/// One prediction after ground-truth matching.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub label: Label,
    pub confidence: f64,
    pub uncertainty: f64,
    /// Best overlap with a ground-truth object of the same class.
    pub best_overlap: f64,
    pub is_correct: bool,
    /// `1 - best_overlap`.
    pub error: f64,
}

/// Reliability-diagram cell over `(lower, upper]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub mean_accuracy: f64,
    pub abs_error: f64,
}

/// Calibration of the predictions carrying one label.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassCalibration {
    pub label: Label,
    /// `None` for a code outside the known classes.
    pub object_type: Option<ObjectType>,
    pub count: usize,
    pub precision: f64,
    pub ece: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionCurve {
    pub fractions: Vec<f64>,
    pub precisions: Vec<f64>,
    pub mean_confidences: Vec<f64>,
}
impl RetentionCurve {
    pub fn len(&self) -> usize {
        self.fractions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fractions.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub iou_threshold: f64,
    pub uncertainty_source: UncertaintySource,
    pub total_predictions: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub precision: f64,
    pub ece: f64,
    pub mce: f64,
    pub brier_score: f64,
    pub auroc: f64,
    pub spearman_correlation: f64,
    pub pearson_correlation: f64,
    pub avg_confidence: f64,
    pub avg_uncertainty: f64,
    pub bins: Vec<CalibrationBin>,
    /// Per-label breakdown, ordered by label code.
    pub class_calibration: Vec<ClassCalibration>,
    /// Unweighted mean of the per-label ECE values.
    pub classwise_ece: f64,
    pub retention: RetentionCurve,
}

#[derive(Clone, Debug)]
pub struct CalibrationEvaluator<O = Iou3d> {
    overlap: O,
    iou_threshold: f64,
    num_bins: usize,
    retention_points: usize,
    retention_min_fraction: f64,
    uncertainty: UncertaintySource,
}

impl CalibrationEvaluator<Iou3d> {
    pub fn new(iou_threshold: f64, num_bins: usize) -> Result<Self> {
        Self::with_overlap(Iou3d, iou_threshold, num_bins)
    }
}

impl<O: BoxOverlap> CalibrationEvaluator<O> {
    pub fn with_overlap(overlap: O, iou_threshold: f64, num_bins: usize) -> Result<Self> {
        check_unit_interval("evaluation.iou_threshold", iou_threshold)?;
        check_positive("evaluation.num_bins", num_bins)?;
        Ok(Self {
            overlap,
            iou_threshold,
            num_bins,
            retention_points: 20,
            retention_min_fraction: 0.1,
            uncertainty: UncertaintySource::ScoreVariance,
        })
    }

    pub fn retention(mut self, points: usize, min_fraction: f64) -> Result<Self> {
        check_positive("evaluation.retention_points", points)?;
        if !(min_fraction > 0.0 && min_fraction <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "evaluation.retention_min_fraction",
                reason: format!("{} is outside (0, 1]", min_fraction),
            });
        }
        self.retention_points = points;
        self.retention_min_fraction = min_fraction;
        Ok(self)
    }

    pub fn uncertainty_source(mut self, source: UncertaintySource) -> Self {
        self.uncertainty = source;
        self
    }

    pub fn iou_threshold(&self) -> f64 {
        self.iou_threshold
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// Best same-class ground-truth overlap of every predicted box.
    ///
    /// Labels without an [`ObjectType`] and classes absent from `gt` give 0.
    pub fn best_overlaps(&self, boxes: &[Box3D], labels: &[Label], gt: &GroundTruthAnnotation) -> Vec<f64> {
        let mut best = vec![0f64; boxes.len()];
        for label in labels.iter().copied().unique() {
            let object_type = match ObjectType::from_label(label) {
                Some(object_type) => object_type,
                None => continue,
            };
            let gt_boxes = gt.boxes_of(object_type);
            if gt_boxes.is_empty() {
                continue;
            }
            let indices: Vec<usize> = (0..boxes.len()).filter(|&i| labels[i] == label).collect();
            let predicted: Vec<Box3D> = indices.iter().map(|&i| boxes[i]).collect();
            let iou_matrix = self.overlap.overlap_matrix(&predicted, &gt_boxes);
            for (row, &i) in indices.iter().enumerate() {
                best[i] = (0..iou_matrix.columns)
                    .map(|col| iou_matrix[&(row, col)])
                    .fold(0f64, f64::max);
            }
        }
        best
    }

    pub fn match_frame(&self, frame: &FrameUncertainty, gt: &GroundTruthAnnotation) -> Vec<PredictionOutcome> {
        let labels: Vec<Label> = frame.records.iter().map(|r| r.label).collect();
        let overlaps = self.best_overlaps(&frame.boxes(), &labels, gt);
        frame
            .records
            .iter()
            .zip(overlaps)
            .map(|(record, best_overlap)| PredictionOutcome {
                label: record.label,
                confidence: record.score,
                uncertainty: self.uncertainty.of(record),
                best_overlap,
                is_correct: best_overlap >= self.iou_threshold,
                error: 1.0 - best_overlap,
            })
            .collect()
    }

    /// Matches every frame against its annotation, then pools the outcomes.
    pub fn evaluate(&self, frames: &[FrameUncertainty], gts: &[GroundTruthAnnotation]) -> Result<EvaluationReport> {
        if frames.len() != gts.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} frames but {} ground-truth annotations",
                frames.len(),
                gts.len()
            )));
        }
        let outcomes: Vec<PredictionOutcome> = frames
            .iter()
            .zip(gts)
            .flat_map(|(frame, gt)| self.match_frame(frame, gt))
            .collect();
        let report = self.evaluate_outcomes(&outcomes);
        tracing::info!(
            frames = frames.len(),
            predictions = report.total_predictions,
            ece = report.ece,
            auroc = report.auroc,
            "evaluation done"
        );
        Ok(report)
    }

    pub fn evaluate_outcomes(&self, outcomes: &[PredictionOutcome]) -> EvaluationReport {
        let confidences: Vec<f64> = outcomes.iter().map(|o| o.confidence).collect();
        let uncertainties: Vec<f64> = outcomes.iter().map(|o| o.uncertainty).collect();
        let errors: Vec<f64> = outcomes.iter().map(|o| o.error).collect();
        let is_correct: Vec<bool> = outcomes.iter().map(|o| o.is_correct).collect();
        let accuracies = as_accuracies(&is_correct);

        let bins = calibration_bins(&confidences, &accuracies, self.num_bins);
        let true_positives = is_correct.iter().filter(|&&c| c).count();
        let (spearman_correlation, pearson_correlation) = uncertainty_error_correlation(&uncertainties, &errors);
        let class_calibration = class_calibration(outcomes, self.num_bins);
        let class_eces: Vec<f64> = class_calibration.iter().map(|c| c.ece).collect();

        EvaluationReport {
            iou_threshold: self.iou_threshold,
            uncertainty_source: self.uncertainty,
            total_predictions: outcomes.len(),
            true_positives,
            false_positives: outcomes.len() - true_positives,
            precision: mean(&accuracies),
            ece: ece_of_bins(&bins, outcomes.len()),
            mce: mce_of_bins(&bins),
            brier_score: brier_score(&confidences, &accuracies),
            auroc: auroc_error_detection(&uncertainties, &is_correct),
            spearman_correlation,
            pearson_correlation,
            avg_confidence: mean(&confidences),
            avg_uncertainty: mean(&uncertainties),
            bins,
            classwise_ece: mean(&class_eces),
            class_calibration,
            retention: retention_curve(
                &confidences,
                &uncertainties,
                &is_correct,
                self.retention_points,
                self.retention_min_fraction,
            ),
        }
    }
}

/// ECE of each label's predictions on their own, in label order.
pub fn class_calibration(outcomes: &[PredictionOutcome], num_bins: usize) -> Vec<ClassCalibration> {
    outcomes
        .iter()
        .map(|o| o.label)
        .sorted()
        .dedup()
        .map(|label| {
            let (confidences, accuracies): (Vec<f64>, Vec<f64>) = outcomes
                .iter()
                .filter(|o| o.label == label)
                .map(|o| (o.confidence, if o.is_correct { 1.0 } else { 0.0 }))
                .unzip();
            ClassCalibration {
                label,
                object_type: ObjectType::from_label(label),
                count: confidences.len(),
                precision: mean(&accuracies),
                ece: expected_calibration_error(&confidences, &accuracies, num_bins),
            }
        })
        .collect()
}

pub(crate) fn as_accuracies(is_correct: &[bool]) -> Vec<f64> {
    is_correct.iter().map(|&c| if c { 1.0 } else { 0.0 }).collect()
}

/// Equal-width confidence bins over `(lower, upper]`.
///
/// The first bin is closed at 0, so a confidence of exactly 0 is binned and
/// weighted like any other prediction. Every bin is returned, empty ones with
/// zero statistics.
pub fn calibration_bins(confidences: &[f64], accuracies: &[f64], num_bins: usize) -> Vec<CalibrationBin> {
    if num_bins == 0 {
        return Vec::new();
    }
    let width = 1.0 / num_bins as f64;
    let uppers: Vec<f64> = (1..=num_bins).map(|i| i as f64 * width).collect();

    let mut sums = vec![(0usize, 0f64, 0f64); num_bins];
    for (&confidence, &accuracy) in confidences.iter().zip(accuracies) {
        let idx = uppers.partition_point(|&upper| upper < confidence).min(num_bins - 1);
        let cell = &mut sums[idx];
        cell.0 += 1;
        cell.1 += confidence;
        cell.2 += accuracy;
    }

    sums.into_iter()
        .enumerate()
        .map(|(i, (count, conf_sum, acc_sum))| {
            let (mean_confidence, mean_accuracy) = if count > 0 {
                (conf_sum / count as f64, acc_sum / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                lower: i as f64 * width,
                upper: uppers[i],
                count,
                mean_confidence,
                mean_accuracy,
                abs_error: (mean_accuracy - mean_confidence).abs(),
            }
        })
        .collect()
}

fn ece_of_bins(bins: &[CalibrationBin], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|bin| bin.count as f64 / total as f64 * bin.abs_error)
        .sum()
}

fn mce_of_bins(bins: &[CalibrationBin]) -> f64 {
    bins.iter()
        .filter(|bin| bin.count > 0)
        .map(|bin| bin.abs_error)
        .fold(0f64, f64::max)
}

pub fn expected_calibration_error(confidences: &[f64], accuracies: &[f64], num_bins: usize) -> f64 {
    let n = confidences.len().min(accuracies.len());
    ece_of_bins(&calibration_bins(confidences, accuracies, num_bins), n)
}

pub fn maximum_calibration_error(confidences: &[f64], accuracies: &[f64], num_bins: usize) -> f64 {
    mce_of_bins(&calibration_bins(confidences, accuracies, num_bins))
}

pub fn brier_score(confidences: &[f64], accuracies: &[f64]) -> f64 {
    let squared: Vec<f64> = confidences
        .iter()
        .zip(accuracies)
        .map(|(c, a)| (c - a) * (c - a))
        .collect();
    mean(&squared)
}

/// AUROC of `uncertainties` as a detector of incorrect predictions.
pub fn auroc_error_detection(uncertainties: &[f64], is_correct: &[bool]) -> f64 {
    let is_error: Vec<bool> = is_correct.iter().map(|c| !c).collect();
    auroc(uncertainties, &is_error)
}

/// `(spearman, pearson)` between uncertainty and localisation error.
pub fn uncertainty_error_correlation(uncertainties: &[f64], errors: &[f64]) -> (f64, f64) {
    (spearman(uncertainties, errors), pearson(uncertainties, errors))
}

/// Precision of the least uncertain predictions at `points` retained fractions
/// from `min_fraction` up to 1.
pub fn retention_curve(
    confidences: &[f64],
    uncertainties: &[f64],
    is_correct: &[bool],
    points: usize,
    min_fraction: f64,
) -> RetentionCurve {
    let n = confidences.len().min(uncertainties.len()).min(is_correct.len());
    let mut order: Vec<usize> = (0..n).collect();
    // stable, equal uncertainties keep input order
    order.sort_by_key(|&i| OrderedFloat(uncertainties[i]));

    let mut curve = RetentionCurve::default();
    for p in 0..points {
        let fraction = if p + 1 == points {
            1.0
        } else {
            min_fraction + (1.0 - min_fraction) * p as f64 / (points - 1) as f64
        };
        let keep = (n as f64 * fraction) as usize;
        if keep == 0 {
            continue;
        }
        let kept = &order[..keep];
        curve.fractions.push(fraction);
        curve
            .precisions
            .push(kept.iter().filter(|&&i| is_correct[i]).count() as f64 / keep as f64);
        curve
            .mean_confidences
            .push(kept.iter().map(|&i| confidences[i]).sum::<f64>() / keep as f64);
    }
    curve
}
