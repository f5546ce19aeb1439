//! Crop rectangles within the source frame.
//!
//! All coordinates are normalized to `[0.0, 1.0]` relative to the
//! orientation-corrected source frame.

use kurbo::{Rect, Size};
use serde::{Deserialize, Serialize};

/// Smallest extent `CropRect::new` will clamp to.
const MIN_EXTENT: f64 = 0.01;

/// A rectangular crop region within the source frame.
///
/// `(0.0, 0.0)` is the top-left and `(1.0, 1.0)` the bottom-right of the
/// upright (orientation-corrected) source picture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge (normalized).
    pub x: f64,
    /// Top edge (normalized).
    pub y: f64,
    /// Width (normalized).
    pub w: f64,
    /// Height (normalized).
    pub h: f64,
}

impl CropRect {
    /// The whole frame (no crop).
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Create a crop rect, clamping it into the unit square.
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        let w = w.clamp(MIN_EXTENT, 1.0);
        let h = h.clamp(MIN_EXTENT, 1.0);
        Self {
            x: x.clamp(0.0, 1.0 - w),
            y: y.clamp(0.0, 1.0 - h),
            w,
            h,
        }
    }

    /// Normalize a pixel rectangle against the frame it was drawn on.
    pub fn from_pixels(rect: Rect, frame: Size) -> Self {
        let fw = frame.width.max(1.0);
        let fh = frame.height.max(1.0);
        let rect = rect.abs();
        Self::new(
            rect.x0 / fw,
            rect.y0 / fh,
            rect.width() / fw,
            rect.height() / fh,
        )
    }

    /// The largest crop with the aspect ratio of `output` that fits inside
    /// `source`, placed by a normalized pan (`0.0` = left/top, `1.0` =
    /// right/bottom) along whichever axis has slack.
    pub fn fill_aspect(source: Size, output: Size, pan_x: f64, pan_y: f64) -> Self {
        if source.is_zero_area() || output.is_zero_area() {
            return Self::FULL;
        }
        let source_ratio = source.width / source.height;
        let output_ratio = output.width / output.height;

        let (w, h) = if source_ratio > output_ratio {
            (output_ratio / source_ratio, 1.0)
        } else {
            (1.0, source_ratio / output_ratio)
        };

        Self {
            x: (1.0 - w) * pan_x.clamp(0.0, 1.0),
            y: (1.0 - h) * pan_y.clamp(0.0, 1.0),
            w,
            h,
        }
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// The crop has a positive extent and lies inside the unit square.
    pub fn is_valid(&self) -> bool {
        const EPS: f64 = 1e-9;
        self.w > 0.0
            && self.h > 0.0
            && self.w <= 1.0 + EPS
            && self.h <= 1.0 + EPS
            && self.x >= -EPS
            && self.y >= -EPS
            && self.right() <= 1.0 + EPS
            && self.bottom() <= 1.0 + EPS
    }

    /// The crop in pixel coordinates of a frame of the given size.
    pub fn to_pixels(&self, frame: Size) -> Rect {
        Rect::new(
            self.x * frame.width,
            self.y * frame.height,
            self.right() * frame.width,
            self.bottom() * frame.height,
        )
    }

    /// Pixel size of the cropped region of a frame of the given size.
    pub fn pixel_size(&self, frame: Size) -> Size {
        Size::new(frame.width * self.w, frame.height * self.h)
    }

    /// Area of the crop (0.0 to 1.0).
    pub fn area(&self) -> f64 {
        self.w * self.h
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}
