pub mod data;

pub mod aggregator;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod matcher;
pub mod overlap;
pub mod report;
pub mod stats;
pub mod temperature;

use rayon::prelude::*;

use crate::aggregator::UncertaintyAggregator;
use crate::data::{input::FrameSamples, output::FrameUncertainty};
use crate::matcher::DetectionMatcher;
use crate::overlap::{BoxOverlap, Iou3d};

pub use crate::config::EngineConfig;
pub use crate::data::{Box3D, Detection, Label, ObjectType};
pub use crate::error::{Error, Result};

/// Matching plus aggregation, frame by frame.
///
/// Frames share nothing, so a batch is processed in parallel; within a frame
/// the sample sets are matched strictly in order.
#[derive(Debug)]
pub struct UncertaintyEngine<O = Iou3d> {
    matcher: DetectionMatcher<O>,
    aggregator: UncertaintyAggregator,
    num_samples: Option<usize>,
}

impl<O: BoxOverlap> UncertaintyEngine<O> {
    pub fn new(matcher: DetectionMatcher<O>, aggregator: UncertaintyAggregator) -> Self {
        Self {
            matcher,
            aggregator,
            num_samples: None,
        }
    }

    /// Declared sample sets per frame, the `detection_frequency` denominator.
    pub fn num_samples(mut self, num_samples: Option<usize>) -> Self {
        self.num_samples = num_samples;
        self
    }

    pub fn matcher(&self) -> &DetectionMatcher<O> {
        &self.matcher
    }

    pub fn process_frame(&self, frame: &FrameSamples) -> FrameUncertainty {
        let num_sets = frame.num_sample_sets();
        if num_sets == 0 {
            tracing::warn!(frame_id = %frame.frame_id, "frame has no sample sets");
            return FrameUncertainty::empty(frame.frame_id.as_str());
        }
        let denominator = match self.num_samples {
            Some(declared) if declared != num_sets => {
                tracing::warn!(
                    frame_id = %frame.frame_id,
                    declared,
                    sample_sets = num_sets,
                    "sample set count differs from the declared number of samples"
                );
                declared.max(num_sets)
            }
            _ => num_sets,
        };
        let groups = self.matcher.match_samples(&frame.sample_sets);
        tracing::debug!(frame_id = %frame.frame_id, sample_sets = num_sets, groups = groups.len(), "frame matched");
        self.aggregator.aggregate_frame(frame.frame_id.as_str(), &groups, denominator)
    }

    /// Output order follows `frames`.
    pub fn process_frames(&self, frames: &[FrameSamples]) -> Vec<FrameUncertainty> {
        tracing::info!(frames = frames.len(), "processing frames");
        let results: Vec<FrameUncertainty> = frames.par_iter().map(|frame| self.process_frame(frame)).collect();
        tracing::info!(
            frames = results.len(),
            detections = results.iter().map(|r| r.records.len()).sum::<usize>(),
            "frames processed"
        );
        results
    }
}
