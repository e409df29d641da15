//! Boolean segmentation masks.
//!
//! Masks are stored row-major in memory and serialized as COCO-style
//! uncompressed RLE: `{"size": [height, width], "counts": [...]}` where the
//! counts walk the image in COLUMN-MAJOR order, start with a run of zeros,
//! and alternate between zeros and ones.

use serde::{Deserialize, Serialize};

use crate::ids::PixelXY;

/// Largest mask accepted from serialized data (16384 x 16384 pixels).
pub const MAX_MASK_PIXELS: u64 = 1 << 28;

/// Errors raised when building masks from raw data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MaskError {
    #[error("mask data has {actual} values, expected {expected} ({width}x{height})")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("RLE counts cover {actual} pixels, expected {expected}")]
    RleLength { expected: u64, actual: u64 },

    #[error("mask size {width}x{height} exceeds the {MAX_MASK_PIXELS} pixel limit")]
    TooLarge { width: u32, height: u32 },
}

/// An H×W boolean mask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Rle", into = "Rle")]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<bool>,
}

/// Uncompressed COCO RLE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rle {
    /// `[height, width]`.
    pub size: [u32; 2],
    /// Alternating run lengths, zeros first, column-major.
    pub counts: Vec<u32>,
}

impl Mask {
    /// An all-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Build a mask by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a mask from row-major booleans.
    pub fn from_bools(width: u32, height: u32, data: Vec<bool>) -> Result<Self, MaskError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(MaskError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Binarize row-major scores or probabilities with `value >= threshold`.
    pub fn threshold(
        width: u32,
        height: u32,
        values: &[f32],
        threshold: f32,
    ) -> Result<Self, MaskError> {
        Self::from_bools(
            width,
            height,
            values.iter().map(|v| *v >= threshold).collect(),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major pixel values.
    pub fn as_slice(&self) -> &[bool] {
        &self.data
    }

    /// Pixel value; out-of-range reads are false.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.data[(y * self.width + x) as usize]
    }

    /// Set a pixel; out-of-range writes are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = value;
        }
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|v| **v).count()
    }

    /// True when no pixel is set.
    pub fn is_empty(&self) -> bool {
        !self.data.iter().any(|v| *v)
    }

    /// Tight inclusive box around the set pixels, `None` for an empty mask.
    pub fn bounding_box(&self) -> Option<(PixelXY, PixelXY)> {
        let mut min = PixelXY::new(i32::MAX, i32::MAX);
        let mut max = PixelXY::new(i32::MIN, i32::MIN);
        let mut any = false;
        for y in 0..self.height {
            let row = &self.data[(y * self.width) as usize..((y + 1) * self.width) as usize];
            for (x, set) in row.iter().enumerate() {
                if *set {
                    let p = PixelXY::new(x as i32, y as i32);
                    min = min.min(p);
                    max = max.max(p);
                    any = true;
                }
            }
        }
        any.then_some((min, max))
    }

    /// Encode as column-major RLE.
    pub fn to_rle(&self) -> Rle {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run: u32 = 0;
        for x in 0..self.width {
            for y in 0..self.height {
                let value = self.data[(y * self.width + x) as usize];
                if value != current {
                    counts.push(run);
                    run = 0;
                    current = value;
                }
                run += 1;
            }
        }
        counts.push(run);
        Rle {
            size: [self.height, self.width],
            counts,
        }
    }

    /// Decode column-major RLE.
    pub fn from_rle(rle: &Rle) -> Result<Self, MaskError> {
        let [height, width] = rle.size;
        let expected = width as u64 * height as u64;
        if expected > MAX_MASK_PIXELS {
            return Err(MaskError::TooLarge { width, height });
        }
        let actual: u64 = rle.counts.iter().map(|c| *c as u64).sum();
        if actual != expected {
            return Err(MaskError::RleLength { expected, actual });
        }

        let mut mask = Mask::new(width, height);
        let mut index: u64 = 0;
        let mut value = false;
        for &count in &rle.counts {
            if value {
                for i in index..index + count as u64 {
                    let x = (i / height as u64) as u32;
                    let y = (i % height as u64) as u32;
                    mask.set(x, y, true);
                }
            }
            index += count as u64;
            value = !value;
        }
        Ok(mask)
    }
}

impl TryFrom<Rle> for Mask {
    type Error = MaskError;

    fn try_from(rle: Rle) -> Result<Self, Self::Error> {
        Mask::from_rle(&rle)
    }
}

impl From<Mask> for Rle {
    fn from(mask: Mask) -> Self {
        mask.to_rle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bounding_box_is_tight() {
        let mask = Mask::from_fn(10, 8, |x, y| (2..=5).contains(&x) && (3..=6).contains(&y));
        let (tl, br) = mask.bounding_box().unwrap();
        assert_eq!(tl, PixelXY::new(2, 3));
        assert_eq!(br, PixelXY::new(5, 6));
        assert_eq!(mask.count(), 16);
    }

    #[test]
    fn test_empty_mask_has_no_box() {
        let mask = Mask::new(4, 4);
        assert!(mask.is_empty());
        assert!(mask.bounding_box().is_none());
    }

    #[test]
    fn test_rle_is_column_major_and_starts_with_zeros() {
        // 2x2 mask with only the top-right pixel set:
        // column 0 = [0, 0], column 1 = [1, 0]
        let mut mask = Mask::new(2, 2);
        mask.set(1, 0, true);
        let rle = mask.to_rle();
        assert_eq!(rle.size, [2, 2]);
        assert_eq!(rle.counts, vec![2, 1, 1]);
    }

    #[test]
    fn test_rle_leading_one_emits_zero_run() {
        let mut mask = Mask::new(1, 2);
        mask.set(0, 0, true);
        assert_eq!(mask.to_rle().counts, vec![0, 1, 1]);
    }

    #[test]
    fn test_rle_rejects_wrong_length() {
        let rle = Rle {
            size: [2, 2],
            counts: vec![1, 1],
        };
        assert!(matches!(
            Mask::from_rle(&rle),
            Err(MaskError::RleLength {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_rle_rejects_oversized_mask() {
        let rle = Rle {
            size: [65536, 65536],
            counts: vec![u32::MAX, 1],
        };
        assert_eq!(
            Mask::from_rle(&rle),
            Err(MaskError::TooLarge {
                width: 65536,
                height: 65536
            })
        );

        let json = r#"{"size":[65536,65536],"counts":[4294967295,1]}"#;
        assert!(serde_json::from_str::<Mask>(json).is_err());
    }

    #[test]
    fn test_threshold() {
        let mask = Mask::threshold(2, 1, &[0.49, 0.5], 0.5).unwrap();
        assert!(!mask.get(0, 0));
        assert!(mask.get(1, 0));
        assert!(Mask::threshold(2, 2, &[0.1], 0.5).is_err());
    }

    #[test]
    fn test_mask_serializes_as_rle() {
        let mask = Mask::from_fn(3, 2, |x, _| x == 2);
        let json = serde_json::to_value(&mask).unwrap();
        assert_eq!(json["size"], serde_json::json!([2, 3]));
        let back: Mask = serde_json::from_value(json).unwrap();
        assert_eq!(back, mask);
    }

    proptest! {
        #[test]
        fn prop_rle_roundtrip(width in 0u32..12, height in 0u32..12, seed in any::<u64>()) {
            let mask = Mask::from_fn(width, height, |x, y| {
                let h = seed ^ ((x as u64) << 32 | y as u64).wrapping_mul(0x9e3779b97f4a7c15);
                h.count_ones() % 2 == 0
            });
            let decoded = Mask::from_rle(&mask.to_rle()).unwrap();
            prop_assert_eq!(decoded, mask);
        }
    }
}
