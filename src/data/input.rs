//! # Inputs: detector samples and KITTI ground truth

use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::bbox_3d::BOX_DIM;
use super::{Box3D, Detection, Label, ObjectType};
use crate::error::{Error, Result};

/// Detections of one stochastic pass (or one ensemble member) on one frame.
///
/// Serialised as a bare list of detections; deserialising checks every score.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Detection>", into = "Vec<Detection>")]
pub struct SampleSet {
    pub detections: Vec<Detection>,
}
impl SampleSet {
    pub fn new(detections: Vec<Detection>) -> Result<Self> {
        for det in &detections {
            check_score(det.score)?;
        }
        Ok(Self { detections })
    }

    /// Builds a sample set from the detector's parallel output arrays.
    pub fn from_arrays(boxes: &[[f64; BOX_DIM]], scores: &[f64], labels: &[Label]) -> Result<Self> {
        if boxes.len() != scores.len() || boxes.len() != labels.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} boxes, {} scores, {} labels",
                boxes.len(),
                scores.len(),
                labels.len()
            )));
        }
        Self::new(
            boxes
                .iter()
                .zip(scores)
                .zip(labels)
                .map(|((bbox, &score), &label)| Detection { bbox: Box3D(*bbox), score, label })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn boxes(&self) -> Vec<Box3D> {
        self.detections.iter().map(|d| d.bbox).collect()
    }
}

impl TryFrom<Vec<Detection>> for SampleSet {
    type Error = Error;

    fn try_from(detections: Vec<Detection>) -> Result<Self> {
        Self::new(detections)
    }
}

impl From<SampleSet> for Vec<Detection> {
    fn from(set: SampleSet) -> Self {
        set.detections
    }
}

fn check_score(score: f64) -> Result<()> {
    if (0.0..=1.0).contains(&score) {
        Ok(())
    } else {
        Err(Error::ScoreOutOfRange(score))
    }
}

/// All sample sets produced for one frame. Empty sets still count as passes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSamples {
    pub frame_id: String,
    pub sample_sets: Vec<SampleSet>,
}
impl FrameSamples {
    pub fn num_sample_sets(&self) -> usize {
        self.sample_sets.len()
    }
}

/// Per-box raw class scores (before any activation) for temperature scaling.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFramePredictions {
    pub frame_id: String,
    pub boxes: Vec<Box3D>,
    /// `logits[i][c]` is the raw score of box `i` for class index `c`.
    pub logits: Vec<Vec<f64>>,
}
impl RawFramePredictions {
    pub fn check_shape(&self) -> Result<()> {
        if self.boxes.len() != self.logits.len() {
            return Err(Error::ShapeMismatch(format!(
                "frame {}: {} boxes but {} logit rows",
                self.frame_id,
                self.boxes.len(),
                self.logits.len()
            )));
        }
        if let Some(idx) = self.logits.iter().position(|row| row.is_empty()) {
            return Err(Error::ShapeMismatch(format!(
                "frame {}: box {} has no class scores",
                self.frame_id, idx
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox2D {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// One object line of a KITTI label file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthObject {
    pub class_name: String,
    pub truncated: f64,
    pub occluded: i32,
    pub alpha: f64,
    pub bbox_2d: BBox2D,
    /// `(h, w, l)` in label order.
    pub dimensions: [f64; 3],
    pub location: [f64; 3],
    pub rotation_y: f64,
}
impl GroundTruthObject {
    pub fn object_type(&self) -> Option<ObjectType> {
        self.class_name.parse().ok()
    }

    /// `[loc_x, loc_y, loc_z, l, w, h, rotation_y]`
    pub fn to_box(&self) -> Box3D {
        let [h, w, l] = self.dimensions;
        let [x, y, z] = self.location;
        Box3D::new(x, y, z, l, w, h, self.rotation_y)
    }
}

/// Ground truth of one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthAnnotation {
    pub objects: Vec<GroundTruthObject>,
}
impl GroundTruthAnnotation {
    pub fn parse(content: &str) -> Result<Self> {
        let mut objects = Vec::new();
        for (line_idx, each_line) in content.lines().enumerate() {
            if each_line.trim().is_empty() {
                continue;
            }
            objects.push(parse_label_line(each_line).map_err(|reason| Error::Parse {
                line: line_idx + 1,
                reason,
            })?);
        }
        Ok(Self { objects })
    }

    /// A missing file is an empty annotation, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no label file, frame has no objects");
            return Ok(Self::default());
        }
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn load_for_frame(label_dir: &Path, frame_id: &str) -> Result<Self> {
        Self::load(&label_path(label_dir, frame_id))
    }

    /// Boxes of every object whose class parses to `object_type`.
    pub fn boxes_of(&self, object_type: ObjectType) -> Vec<Box3D> {
        self.objects
            .iter()
            .filter(|o| o.object_type() == Some(object_type))
            .map(GroundTruthObject::to_box)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Loads the annotation of every frame id, in order.
pub fn load_ground_truth(label_dir: &Path, frame_ids: &[String]) -> Result<Vec<GroundTruthAnnotation>> {
    if !label_dir.is_dir() {
        return Err(Error::MissingGroundTruth(label_dir.to_path_buf()));
    }
    frame_ids
        .iter()
        .map(|id| GroundTruthAnnotation::load_for_frame(label_dir, id))
        .collect()
}

/// `000042` and `000042.bin` both map to `<dir>/000042.txt`; numeric ids are zero padded.
pub fn label_path(label_dir: &Path, frame_id: &str) -> PathBuf {
    let stem = frame_id.strip_suffix(".bin").unwrap_or(frame_id);
    let file_name = match stem.parse::<u64>() {
        Ok(n) if stem.len() < 6 => format!("{:06}.txt", n),
        _ => format!("{}.txt", stem),
    };
    label_dir.join(file_name)
}

const LABEL_FIELDS: usize = 15;

type LabelFields = (String, f64, i32, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64);

fn parse_label_line(line: &str) -> std::result::Result<GroundTruthObject, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < LABEL_FIELDS {
        return Err(format!("expected {} fields, found {}", LABEL_FIELDS, tokens.len()));
    }
    // detector result files append a score column, which ground truth does not use
    let normalized = tokens[..LABEL_FIELDS].iter().join(" ");
    let (class_name, truncated, occluded, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rotation_y) =
        scan_label_fields(&normalized).map_err(|e| format!("{:?}", e))?;
    Ok(GroundTruthObject {
        class_name,
        truncated,
        occluded,
        alpha,
        bbox_2d: BBox2D { x1, y1, x2, y2 },
        dimensions: [h, w, l],
        location: [x, y, z],
        rotation_y,
    })
}

fn scan_label_fields(line: &str) -> std::result::Result<LabelFields, text_io::Error> {
    let (class_name, truncated, occluded, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y):
        (String, f64, i32, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64, f64);
    text_io::try_scan!(line.bytes() => "{} {} {} {} {} {} {} {} {} {} {} {} {} {} {}",
        class_name, truncated, occluded, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y);
    Ok((class_name, truncated, occluded, alpha, x1, y1, x2, y2, h, w, l, x, y, z, rot_y))
}
