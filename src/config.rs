//! Engine configuration. Every field has a default, so a config file only
//! needs to name what it changes.

use std::path::Path;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::aggregator::{EpistemicPolicy, UncertaintyAggregator};
use crate::error::{check_positive, check_unit_interval, Error, Result};
use crate::evaluation::{CalibrationEvaluator, UncertaintySource};
use crate::matcher::{Assignment, DetectionMatcher, ReferenceBox};
use crate::temperature::{Activation, Objective, TemperatureCalibrator};
use crate::UncertaintyEngine;

/// Where the sample sets come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Repeated inference passes with dropout left on.
    #[strum(to_string = "MC Dropout")]
    McDropout,
    /// Independently trained models.
    #[strum(to_string = "Ensemble")]
    Ensemble,
}
impl SamplingMode {
    pub fn default_reference(self) -> ReferenceBox {
        match self {
            SamplingMode::McDropout => ReferenceBox::LatestBox,
            SamplingMode::Ensemble => ReferenceBox::MeanBox,
        }
    }
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EngineConfig {
    #[derivative(Default(value = "SamplingMode::McDropout"))]
    pub mode: SamplingMode,
    /// Declared passes or ensemble members per frame. Unset means the frame's
    /// own sample-set count; when set, a frame with fewer sets still divides
    /// by this number.
    pub num_samples: Option<usize>,
    pub matching: MatchingConfig,
    pub aggregation: AggregationConfig,
    pub evaluation: EvaluationConfig,
    pub temperature: TemperatureConfig,
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct MatchingConfig {
    #[derivative(Default(value = "0.5"))]
    pub iou_threshold: f64,
    /// Unset means the sampling mode decides.
    pub reference: Option<ReferenceBox>,
    #[derivative(Default(value = "Assignment::Greedy"))]
    pub assignment: Assignment,
    pub class_aware: bool,
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AggregationConfig {
    #[derivative(Default(value = "EpistemicPolicy::ScoreVariance"))]
    pub epistemic: EpistemicPolicy,
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct EvaluationConfig {
    #[derivative(Default(value = "0.7"))]
    pub iou_threshold: f64,
    #[derivative(Default(value = "10"))]
    pub num_bins: usize,
    #[derivative(Default(value = "20"))]
    pub retention_points: usize,
    #[derivative(Default(value = "0.1"))]
    pub retention_min_fraction: f64,
    #[derivative(Default(value = "UncertaintySource::ScoreVariance"))]
    pub uncertainty: UncertaintySource,
}

#[derive(Derivative, Serialize, Deserialize)]
#[derivative(Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct TemperatureConfig {
    #[derivative(Default(value = "0.01"))]
    pub lower: f64,
    #[derivative(Default(value = "10.0"))]
    pub upper: f64,
    #[derivative(Default(value = "20"))]
    pub restarts: usize,
    #[derivative(Default(value = "24"))]
    pub refine_iterations: usize,
    pub seed: u64,
    #[derivative(Default(value = "Activation::Sigmoid"))]
    pub activation: Activation,
    #[derivative(Default(value = "Objective::Ece"))]
    pub objective: Objective,
    /// IoU needed for a scaled prediction to count as correct.
    #[derivative(Default(value = "0.6"))]
    pub iou_threshold: f64,
    #[derivative(Default(value = "10"))]
    pub num_bins: usize,
}

impl EngineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let config: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(num_samples) = self.num_samples {
            check_positive("num_samples", num_samples)?;
        }
        check_unit_interval("matching.iou_threshold", self.matching.iou_threshold)?;

        let eval = &self.evaluation;
        check_unit_interval("evaluation.iou_threshold", eval.iou_threshold)?;
        check_positive("evaluation.num_bins", eval.num_bins)?;
        check_positive("evaluation.retention_points", eval.retention_points)?;
        if !(eval.retention_min_fraction > 0.0 && eval.retention_min_fraction <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "evaluation.retention_min_fraction",
                reason: format!("{} is outside (0, 1]", eval.retention_min_fraction),
            });
        }

        let temp = &self.temperature;
        check_unit_interval("temperature.iou_threshold", temp.iou_threshold)?;
        check_positive("temperature.num_bins", temp.num_bins)?;
        check_positive("temperature.restarts", temp.restarts)?;
        crate::temperature::check_bounds(temp.lower, temp.upper)
    }

    pub fn reference_box(&self) -> ReferenceBox {
        self.matching
            .reference
            .unwrap_or_else(|| self.mode.default_reference())
    }

    pub fn matcher(&self) -> Result<DetectionMatcher> {
        Ok(DetectionMatcher::new(self.matching.iou_threshold, self.reference_box())?
            .assignment(self.matching.assignment)
            .class_aware(self.matching.class_aware))
    }

    pub fn aggregator(&self) -> UncertaintyAggregator {
        UncertaintyAggregator::new(self.aggregation.epistemic.model())
    }

    pub fn engine(&self) -> Result<UncertaintyEngine> {
        Ok(UncertaintyEngine::new(self.matcher()?, self.aggregator()).num_samples(self.num_samples))
    }

    pub fn evaluator(&self) -> Result<CalibrationEvaluator> {
        let eval = &self.evaluation;
        Ok(CalibrationEvaluator::new(eval.iou_threshold, eval.num_bins)?
            .retention(eval.retention_points, eval.retention_min_fraction)?
            .uncertainty_source(eval.uncertainty))
    }

    /// Evaluator used to decide which scaled predictions are correct.
    pub fn temperature_evaluator(&self) -> Result<CalibrationEvaluator> {
        CalibrationEvaluator::new(self.temperature.iou_threshold, self.temperature.num_bins)
    }

    pub fn calibrator(&self) -> Result<TemperatureCalibrator> {
        let temp = &self.temperature;
        Ok(TemperatureCalibrator::new(temp.lower, temp.upper, temp.restarts)?
            .num_bins(temp.num_bins)?
            .refine_iterations(temp.refine_iterations)
            .seed(temp.seed)
            .activation(temp.activation)
            .objective(temp.objective))
    }
}
