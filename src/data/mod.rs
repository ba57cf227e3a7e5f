use std::convert::TryFrom;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Raw class code as emitted by the detector.
pub type Label = u8;

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    num_enum::TryFromPrimitive,
    num_enum::IntoPrimitive,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum ObjectType {
    #[strum(ascii_case_insensitive)]
    Car = 1,
    #[strum(ascii_case_insensitive)]
    Pedestrian = 2,
    #[strum(ascii_case_insensitive)]
    Cyclist = 3,
}
impl ObjectType {
    pub fn from_label(label: Label) -> Option<Self> {
        Self::try_from(label).ok()
    }

    pub fn label(self) -> Label {
        self.into()
    }
}

/*
                  z (up)
                  |      (7)________(6)
                  |      /|        /|
                  |     / |       / |
                  | (4)/__|_____(5) |
                  |    |  |      |  |
                  |    | (3)_____|__|(2)
                  |    |  /   O  |  /      heading (yaw = 0) along +x
                  |    | /       | /
                  |    |/________|/
                  |   (0)       (1)
                  |
                  o----------------------- x
                 /
                y

    (x, y, z) is the box centre O, l runs along the heading, w across it and
    h along z. yaw rotates the box about z, counter-clockwise seen from above.
*/

pub mod bbox_3d {
    use nalgebra as na;

    use derive_more::Display;
    use geo::{LineString, Polygon};
    use serde::{Deserialize, Serialize};

    pub const BOX_DIM: usize = 7;

    /// `[x, y, z, l, w, h, yaw]`
    #[derive(Clone, Copy, Debug, PartialEq, Display, Serialize, Deserialize)]
    #[display(
        fmt = "x: {}, y: {}, z: {}, l: {}, w: {}, h: {}, yaw: {}",
        "_0[0]",
        "_0[1]",
        "_0[2]",
        "_0[3]",
        "_0[4]",
        "_0[5]",
        "_0[6]"
    )]
    #[serde(transparent)]
    pub struct Box3D(pub [f64; BOX_DIM]);
    impl Box3D {
        pub fn new(x: f64, y: f64, z: f64, l: f64, w: f64, h: f64, yaw: f64) -> Self {
            Self([x, y, z, l, w, h, yaw])
        }

        pub fn center(&self) -> [f64; 3] {
            [self.0[0], self.0[1], self.0[2]]
        }

        pub fn extents(&self) -> [f64; 3] {
            [self.0[3], self.0[4], self.0[5]]
        }

        pub fn yaw(&self) -> f64 {
            self.0[6]
        }

        pub fn volume(&self) -> f64 {
            let [l, w, h] = self.extents();
            (l * w * h).abs()
        }

        /// Lower and upper bound of the box along z.
        pub fn z_range(&self) -> (f64, f64) {
            let half_h = self.0[5].abs() / 2.0;
            (self.0[2] - half_h, self.0[2] + half_h)
        }

        pub fn to_corner_points(&self) -> CornerPoints {
            let Self([x, y, z, l, w, h, yaw]) = *self;
            let iso = na::Isometry3::new(na::Vector3::new(x, y, z), na::Vector3::z() * yaw);
            let (hl, hw, hh) = (l / 2.0, w / 2.0, h / 2.0);
            CornerPoints([
                // bottom face, counter-clockwise seen from above
                iso * na::Point3::new(hl, -hw, -hh),
                iso * na::Point3::new(hl, hw, -hh),
                iso * na::Point3::new(-hl, hw, -hh),
                iso * na::Point3::new(-hl, -hw, -hh),
                // top face
                iso * na::Point3::new(hl, -hw, hh),
                iso * na::Point3::new(hl, hw, hh),
                iso * na::Point3::new(-hl, hw, hh),
                iso * na::Point3::new(-hl, -hw, hh),
            ])
        }

        /// Footprint of the box in the x-y plane.
        pub fn bev_polygon(&self) -> Polygon<f64> {
            let CornerPoints(corners) = self.to_corner_points();
            Polygon::new(
                LineString::from(corners[..4].iter().map(|p| (p.x, p.y)).collect::<Vec<_>>()),
                vec![],
            )
        }
    }

    #[derive(Clone, Copy, Debug)]
    pub struct CornerPoints(pub [na::Point3<f64>; 8]);
}

pub use bbox_3d::Box3D;

/// One detection of one stochastic pass (or ensemble member) on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: Box3D,
    pub score: f64,
    pub label: Label,
}

pub mod input;

pub mod output;
