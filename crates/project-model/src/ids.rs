//! Typed identifiers and pixel positions.

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// Identifier of a frame within the loaded sequence.
    FrameId
);
id_type!(
    /// Identifier of a user-defined instance.
    InstanceId
);
id_type!(
    /// Identifier of a point annotation.
    PointId
);
id_type!(
    /// Identifier of a bounding box annotation.
    BBoxId
);

/// Integer pixel position from the top-left corner `(0, 0)`.
///
/// Serialized as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct PixelXY {
    pub x: i32,
    pub y: i32,
}

impl PixelXY {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared euclidean distance, used for hit testing.
    pub fn distance_sq(&self, other: &PixelXY) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }

    /// Component-wise minimum.
    pub fn min(self, other: PixelXY) -> PixelXY {
        PixelXY::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    pub fn max(self, other: PixelXY) -> PixelXY {
        PixelXY::new(self.x.max(other.x), self.y.max(other.y))
    }
}

impl From<(i32, i32)> for PixelXY {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<PixelXY> for (i32, i32) {
    fn from(p: PixelXY) -> Self {
        (p.x, p.y)
    }
}

impl std::fmt::Display for PixelXY {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.x, self.y)
    }
}
