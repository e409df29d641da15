//! Point and bounding-box annotations.
//!
//! Annotations are immutable values; controllers replace them on update.

use serde::{Deserialize, Serialize};

use crate::ids::{BBoxId, FrameId, InstanceId, PixelXY, PointId};

/// Whether a prompt marks the object (positive) or the background (negative).
///
/// Serialized as the integers `0` (negative) and `1` (positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PointKind {
    Negative = 0,
    Positive = 1,
}

impl PointKind {
    /// The opposite kind.
    pub fn toggled(self) -> Self {
        match self {
            PointKind::Negative => PointKind::Positive,
            PointKind::Positive => PointKind::Negative,
        }
    }

    pub fn is_positive(self) -> bool {
        self == PointKind::Positive
    }
}

impl TryFrom<u8> for PointKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PointKind::Negative),
            1 => Ok(PointKind::Positive),
            other => Err(format!("invalid point kind {other}, expected 0 or 1")),
        }
    }
}

impl From<PointKind> for u8 {
    fn from(kind: PointKind) -> Self {
        kind as u8
    }
}

/// A single click prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub position: PixelXY,
    pub kind: PointKind,
}

impl Point {
    pub fn new(position: PixelXY, kind: PointKind) -> Self {
        Self { position, kind }
    }

    pub fn positive(x: i32, y: i32) -> Self {
        Self::new(PixelXY::new(x, y), PointKind::Positive)
    }

    pub fn negative(x: i32, y: i32) -> Self {
        Self::new(PixelXY::new(x, y), PointKind::Negative)
    }
}

/// A point placed on a frame for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PointAnnotation {
    pub point_id: PointId,
    pub frame_id: FrameId,
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub point: Point,
}

impl PointAnnotation {
    /// Same annotation at a new position.
    pub fn with_position(&self, position: PixelXY) -> Self {
        Self {
            point: Point {
                position,
                ..self.point
            },
            ..*self
        }
    }

    /// Same annotation with a new kind.
    pub fn with_kind(&self, kind: PointKind) -> Self {
        Self {
            point: Point { kind, ..self.point },
            ..*self
        }
    }
}

/// Axis-aligned box with inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
    pub top_left: PixelXY,
    pub bottom_right: PixelXY,
    pub kind: PointKind,
}

impl BBox {
    /// Build a box from any two opposite corners.
    pub fn from_corners(a: PixelXY, b: PixelXY, kind: PointKind) -> Self {
        Self {
            top_left: a.min(b),
            bottom_right: a.max(b),
            kind,
        }
    }

    pub fn width(&self) -> i32 {
        self.bottom_right.x - self.top_left.x
    }

    pub fn height(&self) -> i32 {
        self.bottom_right.y - self.top_left.y
    }

    pub fn contains(&self, p: PixelXY) -> bool {
        p.x >= self.top_left.x
            && p.x <= self.bottom_right.x
            && p.y >= self.top_left.y
            && p.y <= self.bottom_right.y
    }

    /// The box shifted by `(dx, dy)`.
    pub fn translated(&self, dx: i32, dy: i32) -> Self {
        Self {
            top_left: PixelXY::new(self.top_left.x + dx, self.top_left.y + dy),
            bottom_right: PixelXY::new(self.bottom_right.x + dx, self.bottom_right.y + dy),
            kind: self.kind,
        }
    }
}

/// A box placed on a frame for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBoxAnnotation {
    pub bbox_id: BBoxId,
    pub frame_id: FrameId,
    pub instance_id: InstanceId,
    #[serde(flatten)]
    pub bbox: BBox,
}

/// Create/update/delete tag carried by change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Create,
    Update,
    Delete,
}
