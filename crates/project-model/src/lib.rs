//! Samnotator Project Model
//!
//! Defines the core data contracts for Samnotator sessions:
//! - **Ids:** Typed identifiers for frames, instances, points, and boxes
//! - **Annotations:** Positive/negative points and bounding boxes per instance
//! - **Instances:** Named objects with per-frame detections
//! - **Masks:** Boolean bitmaps with COCO-compatible RLE serialization
//! - **Project:** The `annotations.json` file tying it all together
//!
//! All coordinates are integer pixels from the top-left corner of the frame.

pub mod annotation;
pub mod colour;
pub mod ids;
pub mod instance;
pub mod mask;
pub mod project;

pub use annotation::*;
pub use colour::*;
pub use ids::*;
pub use instance::*;
pub use mask::*;
pub use project::*;
