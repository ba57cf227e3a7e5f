//! Reduction of matched groups into per-object uncertainty records.

use std::collections::HashMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::data::{output::FrameUncertainty, output::UncertaintyRecord, Box3D, Label};
use crate::matcher::MatchedGroup;
use crate::stats::{lower_median, mean, population_variance};

/// Keeps `log(0)` out of the entropy.
const ENTROPY_EPS: f64 = 1e-10;

/// Box parameters whose dispersion enters `box_variance` (the centre).
const POSITION_DIMS: usize = 3;

/// How the epistemic part of a group's uncertainty is estimated.
pub trait EpistemicModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// `score_variance` is the population variance of the member scores.
    fn epistemic(&self, group: &MatchedGroup, score_variance: f64) -> f64;
}

/// Treats all score dispersion across samples as epistemic.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScoreVariance;

impl EpistemicModel for ScoreVariance {
    fn name(&self) -> &'static str {
        "score_variance"
    }

    fn epistemic(&self, _group: &MatchedGroup, score_variance: f64) -> f64 {
        score_variance
    }
}

/// Share of members that disagree with the modal label.
#[derive(Clone, Copy, Debug, Default)]
pub struct LabelVariationRatio;

impl EpistemicModel for LabelVariationRatio {
    fn name(&self) -> &'static str {
        "label_variation_ratio"
    }

    fn epistemic(&self, group: &MatchedGroup, _score_variance: f64) -> f64 {
        if group.labels.is_empty() {
            return 0.0;
        }
        let mut counts: HashMap<_, usize> = HashMap::new();
        for label in &group.labels {
            *counts.entry(*label).or_insert(0) += 1;
        }
        let modal = counts.values().copied().max().unwrap_or(0);
        1.0 - modal as f64 / group.labels.len() as f64
    }
}

/// Mutual information between a member's prediction and the sample it came from.
///
/// Member `i` is read as a categorical over the group's labels plus a
/// background slot: `score_i` on its own label, `1 - score_i` on background.
/// The result is the entropy of the mean categorical minus the mean member
/// entropy, so it grows with label flips and score spread alike.
#[derive(Clone, Copy, Debug, Default)]
pub struct MutualInformation;

impl MutualInformation {
    pub fn of_members(labels: &[Label], scores: &[f64]) -> f64 {
        let k = labels.len().min(scores.len());
        if k == 0 {
            return 0.0;
        }
        let classes: Vec<Label> = labels[..k].iter().copied().sorted().dedup().collect();
        // last slot is background
        let mut mean_dist = vec![0f64; classes.len() + 1];
        let mut member_entropy = 0.0;
        for (label, &score) in labels[..k].iter().zip(&scores[..k]) {
            let slot = classes.binary_search(label).unwrap_or(0);
            mean_dist[slot] += score / k as f64;
            mean_dist[classes.len()] += (1.0 - score) / k as f64;
            member_entropy += categorical_entropy(&[score, 1.0 - score]) / k as f64;
        }
        (categorical_entropy(&mean_dist) - member_entropy).max(0.0)
    }
}

impl EpistemicModel for MutualInformation {
    fn name(&self) -> &'static str {
        "mutual_information"
    }

    fn epistemic(&self, group: &MatchedGroup, _score_variance: f64) -> f64 {
        Self::of_members(&group.labels, &group.scores)
    }
}

fn categorical_entropy(probs: &[f64]) -> f64 {
    -probs.iter().map(|p| p * (p + ENTROPY_EPS).ln()).sum::<f64>()
}

/// Named epistemic policies, for configuration files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EpistemicPolicy {
    ScoreVariance,
    LabelVariationRatio,
    MutualInformation,
}
impl EpistemicPolicy {
    pub fn model(self) -> Box<dyn EpistemicModel> {
        match self {
            EpistemicPolicy::ScoreVariance => Box::new(ScoreVariance),
            EpistemicPolicy::LabelVariationRatio => Box::new(LabelVariationRatio),
            EpistemicPolicy::MutualInformation => Box::new(MutualInformation),
        }
    }
}

pub struct UncertaintyAggregator {
    epistemic: Box<dyn EpistemicModel>,
}

impl Default for UncertaintyAggregator {
    fn default() -> Self {
        Self::new(Box::new(ScoreVariance))
    }
}

impl std::fmt::Debug for UncertaintyAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UncertaintyAggregator")
            .field("epistemic", &self.epistemic.name())
            .finish()
    }
}

impl UncertaintyAggregator {
    pub fn new(epistemic: Box<dyn EpistemicModel>) -> Self {
        Self { epistemic }
    }

    /// Reduces one group drawn from `num_sample_sets` sample sets.
    ///
    /// Returns `None` for an empty group.
    pub fn aggregate(&self, group: &MatchedGroup, num_sample_sets: usize) -> Option<UncertaintyRecord> {
        if group.is_empty() {
            return None;
        }
        let k = group.len();

        let score = mean(&group.scores);
        let score_variance = population_variance(&group.scores);
        let box_variance = box_center_variance(&group.boxes);

        Some(UncertaintyRecord {
            bbox: group.mean_box(),
            score,
            label: lower_median(&group.labels)?,
            score_variance,
            score_std: score_variance.sqrt(),
            box_variance,
            model_disagreement: score_variance + box_variance,
            epistemic_uncertainty: self.epistemic.epistemic(group, score_variance),
            predictive_entropy: normalized_entropy(&group.scores),
            // a group holds at most one member per sample set
            detection_frequency: k as f64 / num_sample_sets.max(k) as f64,
            num_members: k,
        })
    }

    pub fn aggregate_frame(
        &self,
        frame_id: impl Into<String>,
        groups: &[MatchedGroup],
        num_sample_sets: usize,
    ) -> FrameUncertainty {
        FrameUncertainty {
            frame_id: frame_id.into(),
            num_sample_sets,
            records: groups
                .iter()
                .filter_map(|g| self.aggregate(g, num_sample_sets))
                .collect(),
        }
    }
}

/// Mean over x, y, z of the population variance of the box centres.
pub fn box_center_variance(boxes: &[Box3D]) -> f64 {
    let per_dim: Vec<f64> = (0..POSITION_DIMS)
        .map(|dim| {
            let column: Vec<f64> = boxes.iter().map(|b| b.0[dim]).collect();
            population_variance(&column)
        })
        .collect();
    mean(&per_dim)
}

/// Shannon entropy of `scores` renormalised to a distribution.
pub fn normalized_entropy(scores: &[f64]) -> f64 {
    let total: f64 = scores.iter().sum::<f64>() + ENTROPY_EPS;
    -scores
        .iter()
        .map(|s| {
            let p = s / total;
            p * (p + ENTROPY_EPS).ln()
        })
        .sum::<f64>()
}
