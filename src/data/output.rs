//! # Outputs: per-object uncertainty records

use serde::{Deserialize, Serialize};

use super::{Box3D, Label};

/// Uncertainty statistics of one matched group of detections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyRecord {
    /// Element-wise mean of the member boxes.
    #[serde(rename = "box")]
    pub bbox: Box3D,
    /// Mean member score.
    pub score: f64,
    /// Lower median of the member label codes.
    pub label: Label,
    pub score_variance: f64,
    pub score_std: f64,
    /// Mean population variance of the box centre over x, y and z.
    pub box_variance: f64,
    /// `score_variance + box_variance`; a relative signal, its scale depends on the box units.
    pub model_disagreement: f64,
    pub epistemic_uncertainty: f64,
    /// Entropy of the member scores renormalised to sum to one.
    pub predictive_entropy: f64,
    /// Fraction of sample sets that contributed a member, in `(0, 1]`.
    pub detection_frequency: f64,
    pub num_members: usize,
}

/// Records of one frame. No records means no detections this frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameUncertainty {
    pub frame_id: String,
    /// Sample sets the records were aggregated over (N); 0 for a frame without any.
    #[serde(default)]
    pub num_sample_sets: usize,
    pub records: Vec<UncertaintyRecord>,
}
impl FrameUncertainty {
    pub fn empty(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            num_sample_sets: 0,
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn boxes(&self) -> Vec<Box3D> {
        self.records.iter().map(|r| r.bbox).collect()
    }

    pub fn scores(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.score).collect()
    }
}
