//! Reframe Media Model
//!
//! Defines the data contracts shared by the export engine:
//! - **Time:** Rational media timestamps and time ranges
//! - **Crop:** Normalized crop rectangles within the source frame
//! - **Orientation:** The four axis-aligned rotations consumer video is stored with
//! - **Asset:** Source asset and track descriptions, container formats
//!
//! Crop coordinates are normalized to `[0.0, 1.0]` relative to the
//! orientation-corrected source frame so they survive any output size.

pub mod asset;
pub mod crop;
pub mod orientation;
pub mod time;

pub use asset::*;
pub use crop::*;
pub use orientation::*;
pub use time::*;
