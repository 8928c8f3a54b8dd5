// Pose interpolation helpers shared by the site animations

use nalgebra::{Point3, Vector3};

pub type Pose = Point3<f32>;
pub type Offset = Vector3<f32>;

/// Ease-in-out curve with flat tangents at both ends.
pub fn ease_in_out(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Interpolate between two poses along the ease-in-out curve.
pub fn ease_between(from: &Pose, to: &Pose, t: f32) -> Pose {
    from.lerp(to, ease_in_out(t))
}

pub fn midpoint(a: &Pose, b: &Pose) -> Pose {
    nalgebra::center(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ease_in_out_endpoints_and_symmetry() {
        assert_eq!(ease_in_out(0.0), 0.0);
        assert_eq!(ease_in_out(1.0), 1.0);
        assert!((ease_in_out(0.5) - 0.5).abs() < 1e-6);
        assert!((ease_in_out(0.25) + ease_in_out(0.75) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ease_in_out_clamps_out_of_range_input() {
        assert_eq!(ease_in_out(-2.0), 0.0);
        assert_eq!(ease_in_out(3.5), 1.0);
    }

    #[test]
    fn test_ease_between_hits_both_ends() {
        let from = Pose::new(0.0, 0.0, 0.0);
        let to = Pose::new(1.0, 2.0, -1.0);
        assert_eq!(ease_between(&from, &to, 0.0), from);
        assert_eq!(ease_between(&from, &to, 1.0), to);
        assert_eq!(midpoint(&from, &to), Pose::new(0.5, 1.0, -0.5));
    }
}
