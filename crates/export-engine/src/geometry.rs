//! Crop geometry: maps source frames onto the output frame.
//!
//! The reader's video output composites every decoded frame through a
//! single affine transform. That transform has to undo the source's stored
//! rotation, scale the crop window to the output width, and shift the crop
//! origin to `(0, 0)` of the output.

use kurbo::{Affine, Point, Size, Vec2};
use reframe_media_model::{CropRect, MediaTime, Orientation, TimeRange};
use serde::{Deserialize, Serialize};

use crate::composition::CompositionTrack;

/// The transform applied to stored source frames during decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderTransform {
    /// Rotation component, derived from the source track.
    pub orientation: Orientation,

    /// Source frame size after orientation correction.
    pub corrected_source_size: Size,

    /// Uniform scale from crop pixels to output pixels.
    pub scale: f64,

    /// Translation in source pixels, before scaling.
    pub offset: Vec2,

    /// `translate(offset * scale) * scale(scale) * rotation`.
    pub affine: Affine,
}

impl RenderTransform {
    pub fn rotation_degrees(&self) -> u32 {
        self.orientation.degrees()
    }

    /// Map a point in the stored (unrotated) source frame to output pixels.
    pub fn apply(&self, point: Point) -> Point {
        self.affine * point
    }
}

/// Compute the render transform for a crop of an oriented source.
///
/// `natural` is the stored frame size, `crop` is normalized against the
/// orientation-corrected frame and `output` is the requested render size.
pub fn resolve_transform(
    natural: Size,
    orientation: Orientation,
    crop: &CropRect,
    output: Size,
) -> RenderTransform {
    let corrected = orientation.corrected_size(natural);
    let middle = crop.pixel_size(corrected);
    let scale = output.width / middle.width;

    let (cx, cy) = (crop.x, crop.y);
    let (width, height) = (corrected.width, corrected.height);
    // The rotation pivots around the origin, so each quarter turn leaves the
    // rotated frame in a different quadrant.
    let offset = match orientation {
        Orientation::Up => Vec2::new(-cx * width, -cy * height),
        Orientation::Right => Vec2::new((1.0 - cx) * width, -cy * height),
        Orientation::Down => Vec2::new((1.0 - cx) * width, (1.0 - cy) * height),
        Orientation::Left => Vec2::new(-cx * width, (1.0 - cy) * height),
    };

    let affine =
        Affine::translate(offset * scale) * Affine::scale(scale) * orientation.rotation();

    tracing::debug!(
        rotation = orientation.degrees(),
        scale,
        offset_x = offset.x,
        offset_y = offset.y,
        corrected_width = corrected.width,
        corrected_height = corrected.height,
        "Resolved render transform"
    );

    RenderTransform {
        orientation,
        corrected_source_size: corrected,
        scale,
        offset,
        affine,
    }
}

/// One layer instruction of a render description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderInstruction {
    /// Range of the composition this instruction covers.
    pub time_range: TimeRange,

    /// Composition track the layer draws.
    pub track_id: u32,

    /// Layer transform.
    pub transform: Affine,

    /// Time at which the transform takes effect.
    pub transform_at: MediaTime,
}

/// Output frame size, frame rate, and per-track transforms applied while decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDescription {
    pub render_size: Size,
    pub frame_duration: MediaTime,
    pub instructions: Vec<RenderInstruction>,
}

impl RenderDescription {
    /// Single-layer description drawing `track` through `transform` for its
    /// whole range.
    ///
    /// The frame duration is one over the track's nominal frame rate rounded
    /// to whole frames, or `fallback_fps` when the track reports none.
    pub fn new(
        track: &CompositionTrack,
        transform: &RenderTransform,
        render_size: Size,
        fallback_fps: u32,
    ) -> Self {
        let fps = track.nominal_frame_rate.round();
        let fps = if fps.is_finite() && fps >= 1.0 {
            fps as u32
        } else {
            fallback_fps.max(1)
        };

        Self {
            render_size,
            frame_duration: MediaTime::new(1, fps),
            instructions: vec![RenderInstruction {
                time_range: track.time_range,
                track_id: track.id,
                transform: transform.affine,
                transform_at: MediaTime::ZERO,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_point(actual: Point, expected: (f64, f64)) {
        assert!(
            (actual.x - expected.0).abs() < 1e-6 && (actual.y - expected.1).abs() < 1e-6,
            "expected {expected:?}, got {actual:?}"
        );
    }

    #[test]
    fn test_full_frame_downscale() {
        let t = resolve_transform(
            Size::new(1920.0, 1080.0),
            Orientation::Up,
            &CropRect::FULL,
            Size::new(960.0, 540.0),
        );
        assert_eq!(t.rotation_degrees(), 0);
        assert!((t.scale - 0.5).abs() < 1e-12);
        assert_eq!(t.offset, Vec2::ZERO);
        assert_point(t.apply(Point::new(1920.0, 1080.0)), (960.0, 540.0));
    }

    #[test]
    fn test_rotated_source_swaps_before_scaling() {
        let t = resolve_transform(
            Size::new(1920.0, 1080.0),
            Orientation::Right,
            &CropRect::new(0.25, 0.25, 0.5, 0.5),
            Size::new(500.0, 500.0),
        );
        assert_eq!(t.rotation_degrees(), 90);
        assert_eq!(t.corrected_source_size, Size::new(1080.0, 1920.0));
        assert!((t.scale - 500.0 / 540.0).abs() < 1e-12);
        assert!((t.offset.x - 0.75 * 1080.0).abs() < 1e-9);
        assert!((t.offset.y + 0.25 * 1920.0).abs() < 1e-9);
    }

    #[test]
    fn test_crop_origin_maps_to_output_origin() {
        let natural = Size::new(1920.0, 1080.0);
        let crop = CropRect::new(0.1, 0.2, 0.5, 0.5);
        for orientation in Orientation::ALL {
            let t = resolve_transform(natural, orientation, &crop, Size::new(640.0, 360.0));
            let corrected = orientation.corrected_size(natural);
            let origin = Point::new(crop.x * corrected.width, crop.y * corrected.height);
            let stored = orientation.display_transform(natural).inverse() * origin;
            assert_point(t.apply(stored), (0.0, 0.0));
        }
    }

    #[test]
    fn test_upside_down_full_frame() {
        let natural = Size::new(1280.0, 720.0);
        let t = resolve_transform(
            natural,
            Orientation::Down,
            &CropRect::FULL,
            Size::new(1280.0, 720.0),
        );
        // The stored top-left pixel ends up bottom-right.
        assert_point(t.apply(Point::ZERO), (1280.0, 720.0));
        assert_point(t.apply(Point::new(1280.0, 720.0)), (0.0, 0.0));
    }

    #[test]
    fn test_render_description_frame_duration() {
        let track = CompositionTrack::test_video(29.97);
        let t = resolve_transform(
            track.natural_size,
            track.orientation,
            &CropRect::FULL,
            Size::new(640.0, 360.0),
        );
        let description = RenderDescription::new(&track, &t, Size::new(640.0, 360.0), 30);
        assert_eq!(description.frame_duration, MediaTime::new(1, 30));
        assert_eq!(description.instructions.len(), 1);
        assert_eq!(description.instructions[0].transform, t.affine);

        let unknown = CompositionTrack::test_video(0.0);
        let description = RenderDescription::new(&unknown, &t, Size::new(640.0, 360.0), 25);
        assert_eq!(description.frame_duration, MediaTime::new(1, 25));
    }
}
