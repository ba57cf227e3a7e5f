//! Post-hoc temperature scaling of detector class scores.
//!
//! ECE is piecewise constant in the temperature, so the search is zero-order:
//! independent restarts from random guesses, each refined by a compass search
//! on a shrinking step, run in parallel and reduced to the best trial.

use ordered_float::OrderedFloat;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::data::input::{GroundTruthAnnotation, RawFramePredictions};
use crate::data::Label;
use crate::error::{check_positive, Error, Result};
use crate::evaluation::{as_accuracies, expected_calibration_error, CalibrationEvaluator};
use crate::overlap::BoxOverlap;

/// Objective value of a rejected temperature.
pub const INVALID_TEMPERATURE_PENALTY: f64 = 1e10;

const NLL_CLAMP: f64 = 1e-12;

/// Initial compass step as a share of the search range.
const INITIAL_STEP_FRACTION: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Activation {
    /// Independent per-class sigmoid.
    Sigmoid,
    Softmax,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Objective {
    Ece,
    NegativeLogLikelihood,
}

/// Scales one box's class logits by `1 / temperature`.
///
/// Returns the winning class index and its activated score. Ties go to the
/// lowest index; an empty row gives `(0, 0.0)`.
pub fn temperature_scale(logits: &[f64], temperature: f64, activation: Activation) -> (usize, f64) {
    let (class_idx, max_logit) = match logits
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, z)| match best {
            Some((_, b)) if z <= b => best,
            _ => Some((i, z)),
        }) {
        Some(best) => best,
        None => return (0, 0.0),
    };
    let score = match activation {
        Activation::Sigmoid => sigmoid(max_logit / temperature),
        Activation::Softmax => {
            // shift by the max so every exponent is <= 0
            let denom: f64 = logits.iter().map(|z| ((z - max_logit) / temperature).exp()).sum();
            1.0 / denom
        }
    };
    (class_idx, score)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub(crate) fn check_bounds(lower: f64, upper: f64) -> Result<()> {
    if lower > 0.0 && lower < upper && upper.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            name: "temperature bounds",
            reason: format!("need 0 < lower < upper, got [{}, {}]", lower, upper),
        })
    }
}

/// Outcome of one restart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub restart: usize,
    pub initial_temperature: f64,
    pub initial_objective: f64,
    pub temperature: f64,
    pub objective: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureFit {
    pub temperature: f64,
    pub objective: f64,
    pub objective_kind: Objective,
    pub activation: Activation,
    pub num_predictions: usize,
    /// In restart order.
    pub trials: Vec<TrialResult>,
}

#[derive(Clone, Debug)]
pub struct TemperatureCalibrator {
    lower: f64,
    upper: f64,
    restarts: usize,
    refine_iterations: usize,
    seed: u64,
    activation: Activation,
    objective: Objective,
    num_bins: usize,
}

impl TemperatureCalibrator {
    pub fn new(lower: f64, upper: f64, restarts: usize) -> Result<Self> {
        check_bounds(lower, upper)?;
        check_positive("temperature.restarts", restarts)?;
        Ok(Self {
            lower,
            upper,
            restarts,
            refine_iterations: 24,
            seed: 0,
            activation: Activation::Sigmoid,
            objective: Objective::Ece,
            num_bins: 10,
        })
    }

    pub fn num_bins(mut self, num_bins: usize) -> Result<Self> {
        check_positive("temperature.num_bins", num_bins)?;
        self.num_bins = num_bins;
        Ok(self)
    }

    pub fn refine_iterations(mut self, refine_iterations: usize) -> Self {
        self.refine_iterations = refine_iterations;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    /// Objective of scaling every row of `logits` by `temperature`.
    pub fn objective_at(&self, logits: &[Vec<f64>], is_correct: &[bool], temperature: f64) -> f64 {
        if !(temperature > 0.0 && temperature.is_finite()) {
            return INVALID_TEMPERATURE_PENALTY;
        }
        let scores: Vec<f64> = logits
            .iter()
            .map(|row| temperature_scale(row, temperature, self.activation).1)
            .collect();
        match self.objective {
            Objective::Ece => expected_calibration_error(&scores, &as_accuracies(is_correct), self.num_bins),
            Objective::NegativeLogLikelihood => {
                if scores.is_empty() {
                    return 0.0;
                }
                let total: f64 = scores
                    .iter()
                    .zip(is_correct)
                    .map(|(&s, &correct)| {
                        let p = s.clamp(NLL_CLAMP, 1.0 - NLL_CLAMP);
                        if correct {
                            -p.ln()
                        } else {
                            -(1.0 - p).ln()
                        }
                    })
                    .sum();
                total / scores.len() as f64
            }
        }
    }

    /// Searches the temperature for predictions whose correctness is already known.
    pub fn fit(&self, logits: &[Vec<f64>], is_correct: &[bool]) -> Result<TemperatureFit> {
        if logits.len() != is_correct.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} logit rows but {} correctness flags",
                logits.len(),
                is_correct.len()
            )));
        }
        if logits.is_empty() {
            tracing::warn!("temperature search without predictions, every temperature scores 0");
        }

        let trials: Vec<TrialResult> = (0..self.restarts)
            .into_par_iter()
            .map(|restart| self.run_trial(restart, logits, is_correct))
            .collect();

        // min_by_key keeps the first minimum, i.e. the lowest restart index
        let best = trials
            .iter()
            .min_by_key(|trial| OrderedFloat(trial.objective))
            .copied()
            .ok_or_else(|| Error::InvalidParameter {
                name: "temperature.restarts",
                reason: "no restarts were run".to_string(),
            })?;
        tracing::info!(
            temperature = best.temperature,
            objective = best.objective,
            restart = best.restart,
            "temperature search done"
        );

        Ok(TemperatureFit {
            temperature: best.temperature,
            objective: best.objective,
            objective_kind: self.objective,
            activation: self.activation,
            num_predictions: logits.len(),
            trials,
        })
    }

    /// Matches raw predictions against ground truth, then runs [`fit`](Self::fit).
    ///
    /// `class_labels[i]` is the label code of logit column `i`. A box is correct
    /// when its same-class overlap reaches the evaluator's threshold.
    pub fn fit_frames<O: BoxOverlap>(
        &self,
        evaluator: &CalibrationEvaluator<O>,
        frames: &[RawFramePredictions],
        gts: &[GroundTruthAnnotation],
        class_labels: &[Label],
    ) -> Result<TemperatureFit> {
        if frames.len() != gts.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} prediction frames but {} ground-truth annotations",
                frames.len(),
                gts.len()
            )));
        }

        let mut logits = Vec::new();
        let mut is_correct = Vec::new();
        for (frame, gt) in frames.iter().zip(gts) {
            frame.check_shape()?;
            // argmax does not depend on a positive temperature
            let labels = frame
                .logits
                .iter()
                .map(|row| {
                    let class_idx = temperature_scale(row, 1.0, self.activation).0;
                    class_labels.get(class_idx).copied().ok_or_else(|| {
                        Error::ShapeMismatch(format!(
                            "class index {} but only {} class labels",
                            class_idx,
                            class_labels.len()
                        ))
                    })
                })
                .collect::<Result<Vec<Label>>>()?;
            let overlaps = evaluator.best_overlaps(&frame.boxes, &labels, gt);

            tracing::debug!(frame_id = %frame.frame_id, boxes = frame.boxes.len(), "matched raw predictions");
            is_correct.extend(overlaps.iter().map(|&iou| iou >= evaluator.iou_threshold()));
            logits.extend(frame.logits.iter().cloned());
        }
        self.fit(&logits, &is_correct)
    }

    fn run_trial(&self, restart: usize, logits: &[Vec<f64>], is_correct: &[bool]) -> TrialResult {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));
        let initial_temperature = rng.gen_range(self.lower..=self.upper);
        let initial_objective = self.objective_at(logits, is_correct, initial_temperature);

        let (mut temperature, mut objective) = (initial_temperature, initial_objective);
        let mut step = (self.upper - self.lower) * INITIAL_STEP_FRACTION;
        let mut halvings = 0;
        while halvings < self.refine_iterations {
            let mut moved = false;
            for candidate in [temperature - step, temperature + step] {
                let candidate = candidate.clamp(self.lower, self.upper);
                let value = self.objective_at(logits, is_correct, candidate);
                if value < objective {
                    temperature = candidate;
                    objective = value;
                    moved = true;
                }
            }
            if !moved {
                step *= 0.5;
                halvings += 1;
            }
        }

        tracing::debug!(restart, initial_temperature, temperature, objective, "temperature trial");
        TrialResult {
            restart,
            initial_temperature,
            initial_objective,
            temperature,
            objective,
        }
    }
}
