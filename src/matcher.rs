//! Cross-sample detection matching.
//!
//! Groups are kept in an arena in creation order. Each round matches one
//! sample set against the groups that existed before the round, marks the
//! claimed detections in a bitmap and seeds a new group from every detection
//! left unclaimed.

use ordered_float::OrderedFloat;
use pathfinding::{kuhn_munkres::kuhn_munkres, matrix::Matrix};
use serde::{Deserialize, Serialize};

use crate::data::{bbox_3d::BOX_DIM, input::SampleSet, Box3D, Detection, Label};
use crate::error::{check_unit_interval, Result};
use crate::overlap::{BoxOverlap, Iou3d};

/// Box a group presents when it is matched against the next sample set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceBox {
    /// Running element-wise mean of the members (ensembles).
    MeanBox,
    /// Most recently added member (stochastic passes).
    LatestBox,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    /// Groups pick their best detection in creation order; a group whose best
    /// detection is already taken gets nothing this round.
    Greedy,
    /// Maximum total overlap per round (Kuhn-Munkres), still gated by the threshold.
    Hungarian,
}

/// Detections from different sample sets believed to be the same object.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedGroup {
    pub boxes: Vec<Box3D>,
    pub scores: Vec<f64>,
    pub labels: Vec<Label>,
    /// Index of the sample set each member came from.
    pub sources: Vec<usize>,
    box_sum: [f64; BOX_DIM],
}
impl MatchedGroup {
    pub fn new(detection: &Detection, source: usize) -> Self {
        let mut group = Self {
            boxes: Vec::new(),
            scores: Vec::new(),
            labels: Vec::new(),
            sources: Vec::new(),
            box_sum: [0f64; BOX_DIM],
        };
        group.push(detection, source);
        group
    }

    pub fn push(&mut self, detection: &Detection, source: usize) {
        for (sum, v) in self.box_sum.iter_mut().zip(detection.bbox.0.iter()) {
            *sum += v;
        }
        self.boxes.push(detection.bbox);
        self.scores.push(detection.score);
        self.labels.push(detection.label);
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn mean_box(&self) -> Box3D {
        let n = self.boxes.len().max(1) as f64;
        let mut mean = self.box_sum;
        for v in mean.iter_mut() {
            *v /= n;
        }
        Box3D(mean)
    }

    pub fn latest_box(&self) -> Box3D {
        self.boxes[self.boxes.len() - 1]
    }

    pub fn reference(&self, policy: ReferenceBox) -> Box3D {
        match policy {
            ReferenceBox::MeanBox => self.mean_box(),
            ReferenceBox::LatestBox => self.latest_box(),
        }
    }

    fn first_label(&self) -> Label {
        self.labels[0]
    }
}

#[derive(Clone, Debug)]
pub struct DetectionMatcher<O = Iou3d> {
    overlap: O,
    iou_threshold: f64,
    reference: ReferenceBox,
    assignment: Assignment,
    class_aware: bool,
}

impl DetectionMatcher<Iou3d> {
    pub fn new(iou_threshold: f64, reference: ReferenceBox) -> Result<Self> {
        Self::with_overlap(Iou3d, iou_threshold, reference)
    }
}

impl<O: BoxOverlap> DetectionMatcher<O> {
    pub fn with_overlap(overlap: O, iou_threshold: f64, reference: ReferenceBox) -> Result<Self> {
        check_unit_interval("matching.iou_threshold", iou_threshold)?;
        Ok(Self {
            overlap,
            iou_threshold,
            reference,
            assignment: Assignment::Greedy,
            class_aware: false,
        })
    }

    pub fn assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn class_aware(mut self, class_aware: bool) -> Self {
        self.class_aware = class_aware;
        self
    }

    pub fn reference_policy(&self) -> ReferenceBox {
        self.reference
    }

    /// Groups the detections of every sample set of one frame.
    ///
    /// The result depends on the order of `sample_sets`. Empty sets are
    /// skipped, so the first non-empty set seeds the initial groups.
    pub fn match_samples(&self, sample_sets: &[SampleSet]) -> Vec<MatchedGroup> {
        let mut groups: Vec<MatchedGroup> = Vec::new();

        for (set_idx, sample_set) in sample_sets.iter().enumerate() {
            if sample_set.is_empty() {
                continue;
            }
            let claimed = if groups.is_empty() {
                vec![false; sample_set.len()]
            } else {
                self.claim(&mut groups, sample_set, set_idx)
            };

            let n_before = groups.len();
            groups.extend(
                sample_set
                    .detections
                    .iter()
                    .zip(&claimed)
                    .filter(|(_, &is_claimed)| !is_claimed)
                    .map(|(det, _)| MatchedGroup::new(det, set_idx)),
            );
            tracing::trace!(
                set_idx,
                matched = claimed.iter().filter(|&&c| c).count(),
                new_groups = groups.len() - n_before,
                "matching round"
            );
        }
        groups
    }

    /// Extends existing groups with detections of `sample_set`; returns the claim bitmap.
    fn claim(&self, groups: &mut [MatchedGroup], sample_set: &SampleSet, set_idx: usize) -> Vec<bool> {
        let refs: Vec<Box3D> = groups.iter().map(|g| g.reference(self.reference)).collect();
        let mut iou_matrix = self.overlap.overlap_matrix(&refs, &sample_set.boxes());
        if self.class_aware {
            for (g_idx, group) in groups.iter().enumerate() {
                for (d_idx, det) in sample_set.detections.iter().enumerate() {
                    if det.label != group.first_label() {
                        iou_matrix[&(g_idx, d_idx)] = 0f64;
                    }
                }
            }
        }

        let pairs = match self.assignment {
            Assignment::Greedy => self.greedy_pairs(&iou_matrix),
            Assignment::Hungarian => self.optimal_pairs(&iou_matrix),
        };

        let mut claimed = vec![false; sample_set.len()];
        for (g_idx, d_idx) in pairs {
            claimed[d_idx] = true;
            groups[g_idx].push(&sample_set.detections[d_idx], set_idx);
        }
        claimed
    }

    fn greedy_pairs(&self, iou_matrix: &Matrix<f64>) -> Vec<(usize, usize)> {
        let mut taken = vec![false; iou_matrix.columns];
        let mut pairs = Vec::new();
        // groups pick in creation order
        for g_idx in 0..iou_matrix.rows {
            let mut best: Option<(usize, f64)> = None;
            for d_idx in 0..iou_matrix.columns {
                let iou = iou_matrix[&(g_idx, d_idx)];
                // strict comparison keeps the first occurrence on ties
                if best.map_or(true, |(_, b)| iou > b) {
                    best = Some((d_idx, iou));
                }
            }
            if let Some((d_idx, iou)) = best {
                if iou > self.iou_threshold && !taken[d_idx] {
                    taken[d_idx] = true;
                    pairs.push((g_idx, d_idx));
                }
            }
        }
        pairs
    }

    fn optimal_pairs(&self, iou_matrix: &Matrix<f64>) -> Vec<(usize, usize)> {
        let (n_groups, n_dets) = (iou_matrix.rows, iou_matrix.columns);
        if n_groups == 0 || n_dets == 0 {
            return Vec::new();
        }
        // kuhn_munkres needs rows <= columns, so the smaller side becomes the rows
        let pairs: Vec<(usize, usize)> = if n_groups <= n_dets {
            let mut weights = Matrix::new(n_groups, n_dets, OrderedFloat(0f64));
            for g_idx in 0..n_groups {
                for d_idx in 0..n_dets {
                    weights[&(g_idx, d_idx)] = OrderedFloat(iou_matrix[&(g_idx, d_idx)]);
                }
            }
            kuhn_munkres(&weights).1.into_iter().enumerate().collect()
        } else {
            let mut weights = Matrix::new(n_dets, n_groups, OrderedFloat(0f64));
            for g_idx in 0..n_groups {
                for d_idx in 0..n_dets {
                    weights[&(d_idx, g_idx)] = OrderedFloat(iou_matrix[&(g_idx, d_idx)]);
                }
            }
            kuhn_munkres(&weights)
                .1
                .into_iter()
                .enumerate()
                .map(|(d_idx, g_idx)| (g_idx, d_idx))
                .collect()
        };
        let mut pairs: Vec<(usize, usize)> = pairs
            .into_iter()
            .filter(|&(g_idx, d_idx)| iou_matrix[&(g_idx, d_idx)] > self.iou_threshold)
            .collect();
        pairs.sort_unstable();
        pairs
    }
}
