//! Source orientation.
//!
//! Consumer video stores frames in sensor orientation and records the
//! upright rotation as a preferred transform on the track. Only the four
//! axis-aligned rotations are supported; the transform is matched once and
//! carried as an [`Orientation`] from then on.

use kurbo::{Affine, Size};
use serde::{Deserialize, Serialize};

/// Tolerance used when matching transform coefficients.
const SIGNATURE_EPSILON: f64 = 1e-3;

/// Clockwise rotation needed to display a track upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// 0°.
    #[default]
    Up,
    /// 90°.
    Right,
    /// 180°.
    Down,
    /// 270°.
    Left,
}

fn approx(value: f64, expected: f64) -> bool {
    (value - expected).abs() < SIGNATURE_EPSILON
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Up,
        Orientation::Right,
        Orientation::Down,
        Orientation::Left,
    ];

    /// Match a preferred transform against the four rotation signatures.
    ///
    /// Returns `None` for anything that is not an axis-aligned rotation
    /// (mirrored or skewed transforms).
    pub fn match_transform(transform: &Affine) -> Option<Orientation> {
        let [a, b, c, d, _, _] = transform.as_coeffs();
        if approx(b, 1.0) && approx(c, -1.0) {
            Some(Orientation::Right)
        } else if approx(a, -1.0) && approx(d, -1.0) {
            Some(Orientation::Down)
        } else if approx(b, -1.0) && approx(c, 1.0) {
            Some(Orientation::Left)
        } else if approx(a, 1.0) && approx(d, 1.0) && approx(b, 0.0) && approx(c, 0.0) {
            Some(Orientation::Up)
        } else {
            None
        }
    }

    /// Derive the orientation of a preferred transform, treating anything
    /// unrecognized as upright.
    pub fn from_transform(transform: &Affine) -> Orientation {
        Self::match_transform(transform).unwrap_or_else(|| {
            tracing::warn!(
                coeffs = ?transform.as_coeffs(),
                "Unsupported track transform; treating source as upright"
            );
            Orientation::Up
        })
    }

    /// Orientation for a clockwise rotation in degrees (any multiple of 90).
    pub fn from_degrees(degrees: i32) -> Option<Orientation> {
        match degrees.rem_euclid(360) {
            0 => Some(Orientation::Up),
            90 => Some(Orientation::Right),
            180 => Some(Orientation::Down),
            270 => Some(Orientation::Left),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Orientation::Up => 0,
            Orientation::Right => 90,
            Orientation::Down => 180,
            Orientation::Left => 270,
        }
    }

    pub fn radians(self) -> f64 {
        (self.degrees() as f64).to_radians()
    }

    /// Width and height trade places when displayed upright.
    pub fn swaps_dimensions(self) -> bool {
        matches!(self, Orientation::Right | Orientation::Left)
    }

    /// Display size of a frame with the given stored size.
    pub fn corrected_size(self, natural: Size) -> Size {
        if self.swaps_dimensions() {
            Size::new(natural.height, natural.width)
        } else {
            natural
        }
    }

    /// Pure rotation with exact quarter-turn coefficients.
    pub fn rotation(self) -> Affine {
        let (cos, sin) = match self {
            Orientation::Up => (1.0, 0.0),
            Orientation::Right => (0.0, 1.0),
            Orientation::Down => (-1.0, 0.0),
            Orientation::Left => (0.0, -1.0),
        };
        Affine::new([cos, sin, -sin, cos, 0.0, 0.0])
    }

    /// The canonical preferred transform for a track of the given stored
    /// size: rotates stored frames into the upright display frame, which
    /// starts at the origin.
    pub fn display_transform(self, natural: Size) -> Affine {
        let (tx, ty) = match self {
            Orientation::Up => (0.0, 0.0),
            Orientation::Right => (natural.height, 0.0),
            Orientation::Down => (natural.width, natural.height),
            Orientation::Left => (0.0, natural.width),
        };
        Affine::translate((tx, ty)) * self.rotation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Point;

    #[test]
    fn test_signatures_round_trip() {
        let natural = Size::new(1920.0, 1080.0);
        for orientation in Orientation::ALL {
            let transform = orientation.display_transform(natural);
            assert_eq!(Orientation::match_transform(&transform), Some(orientation));
        }
    }

    #[test]
    fn test_corrected_size_swaps_for_quarter_turns() {
        let natural = Size::new(1920.0, 1080.0);
        assert_eq!(Orientation::Up.corrected_size(natural), natural);
        assert_eq!(Orientation::Down.corrected_size(natural), natural);
        assert_eq!(
            Orientation::Right.corrected_size(natural),
            Size::new(1080.0, 1920.0)
        );
        assert_eq!(
            Orientation::Left.corrected_size(natural),
            Size::new(1080.0, 1920.0)
        );
    }

    #[test]
    fn test_display_transform_lands_in_upright_frame() {
        let natural = Size::new(1920.0, 1080.0);
        for orientation in Orientation::ALL {
            let upright = orientation.corrected_size(natural);
            let transform = orientation.display_transform(natural);
            for corner in [
                Point::new(0.0, 0.0),
                Point::new(natural.width, 0.0),
                Point::new(0.0, natural.height),
                Point::new(natural.width, natural.height),
            ] {
                let p = transform * corner;
                assert!(p.x > -1e-9 && p.x < upright.width + 1e-9, "{orientation:?}");
                assert!(p.y > -1e-9 && p.y < upright.height + 1e-9, "{orientation:?}");
            }
        }
    }

    #[test]
    fn test_unknown_transform_falls_back_to_up() {
        let skewed = Affine::new([1.0, 0.3, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(Orientation::match_transform(&skewed), None);
        assert_eq!(Orientation::from_transform(&skewed), Orientation::Up);
    }

    #[test]
    fn test_from_degrees() {
        assert_eq!(Orientation::from_degrees(-90), Some(Orientation::Left));
        assert_eq!(Orientation::from_degrees(450), Some(Orientation::Right));
        assert_eq!(Orientation::from_degrees(45), None);
    }
}
