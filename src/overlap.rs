//! Box overlap scores.
//!
//! The engine only needs an m×n matrix of overlaps in `[0, 1]`; anything
//! implementing [`BoxOverlap`] can stand in for the polygon-clipping backend
//! below, as long as it is safe to share between frame workers.

use geo::{intersects::Intersects, prelude::Area};
use geo_clipper::Clipper;
use itertools::Itertools;
use pathfinding::matrix::Matrix;

use crate::data::Box3D;

/// Scale used by clipper to turn polygon coordinates into integers.
const CLIPPER_FACTOR: f64 = 1e6;

const MIN_UNION: f64 = 1e-12;

pub trait BoxOverlap: Sync {
    /// Overlap of two boxes: 0 for disjoint volumes, 1 for identical ones.
    fn overlap(&self, a: &Box3D, b: &Box3D) -> f64;

    /// `matrix[&(i, j)]` is the overlap of `a[i]` and `b[j]`. Empty inputs give an empty dimension.
    fn overlap_matrix(&self, a: &[Box3D], b: &[Box3D]) -> Matrix<f64> {
        let mut matrix = Matrix::new(a.len(), b.len(), 0f64);
        for ((i, box_a), (j, box_b)) in a.iter().enumerate().cartesian_product(b.iter().enumerate()) {
            matrix[&(i, j)] = self.overlap(box_a, box_b);
        }
        matrix
    }
}

/// Volumetric IoU of oriented boxes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Iou3d;

impl BoxOverlap for Iou3d {
    fn overlap(&self, a: &Box3D, b: &Box3D) -> f64 {
        iou3d(a, b).0
    }
}

/// IoU of the bird's-eye-view footprints only.
#[derive(Clone, Copy, Debug, Default)]
pub struct IouBev;

impl BoxOverlap for IouBev {
    fn overlap(&self, a: &Box3D, b: &Box3D) -> f64 {
        iou3d(a, b).1
    }
}

pub fn iou3d(bbox1: &Box3D, bbox2: &Box3D) -> (
    f64,  // 3d IoU
    f64,  // bird's-eye-view IoU
) {
    let (bbox1_base, bbox2_base) = (bbox1.bev_polygon(), bbox2.bev_polygon());
    if !bbox1_base.intersects(&bbox2_base) {
        return (0f64, 0f64);
    }
    let (bbox1_base_area, bbox2_base_area) = (bbox1_base.unsigned_area(), bbox2_base.unsigned_area());
    // clipper may split touching footprints into several pieces, so sum all of them
    let base_intersection_area = bbox1_base.intersection(&bbox2_base, CLIPPER_FACTOR).unsigned_area();

    let ((bbox1_low, bbox1_high), (bbox2_low, bbox2_high)) = (bbox1.z_range(), bbox2.z_range());
    let h_intersection_len = (bbox1_high.min(bbox2_high) - bbox1_low.max(bbox2_low)).max(0f64);

    let (bbox1_vol, bbox2_vol, intersection_vol) = (
        bbox1_base_area * (bbox1_high - bbox1_low),
        bbox2_base_area * (bbox2_high - bbox2_low),
        base_intersection_area * h_intersection_len,
    );

    (
        ratio(intersection_vol, bbox1_vol + bbox2_vol - intersection_vol),
        ratio(base_intersection_area, bbox1_base_area + bbox2_base_area - base_intersection_area),
    )
}

fn ratio(intersection: f64, union: f64) -> f64 {
    if union > MIN_UNION {
        (intersection / union).clamp(0f64, 1f64)
    } else {
        0f64
    }
}
