// Differential-drive kinematics for the crawler tracks
// Converts body-frame velocities (vx, va) to per-track surface velocities and back.

/// Surface velocities of the right and left tracks [m/s]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelVelocities {
    pub right: f64,
    pub left: f64,
}

impl WheelVelocities {
    pub fn new(right: f64, left: f64) -> Self {
        Self { right, left }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Clamp both tracks symmetrically to ±limit
    pub fn clamped(self, limit: f64) -> Self {
        Self {
            right: self.right.clamp(-limit, limit),
            left: self.left.clamp(-limit, limit),
        }
    }
}

/// Body velocity to track velocities
///
/// # Arguments
/// * `vx` - Forward velocity in m/s (positive = forward)
/// * `va` - Yaw rate in rad/s (positive = counter-clockwise)
/// * `turning_radius` - Distance from the body centre to each track [m]
pub fn body_to_wheel(vx: f64, va: f64, turning_radius: f64) -> WheelVelocities {
    WheelVelocities {
        right: vx + va * turning_radius,
        left: vx - va * turning_radius,
    }
}

/// Track velocities to body forward velocity and yaw rate `(vx, va)`
pub fn wheel_to_body(wheels: WheelVelocities, turning_radius: f64) -> (f64, f64) {
    let vx = (wheels.right + wheels.left) / 2.0;
    let va = (wheels.right - wheels.left) / (2.0 * turning_radius);
    (vx, va)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TURNING_RADIUS: f64 = 0.0938;

    #[test]
    fn test_zero_velocity() {
        let wheels = body_to_wheel(0.0, 0.0, TURNING_RADIUS);
        assert_eq!(wheels, WheelVelocities::zero());
    }

    #[test]
    fn test_forward_motion() {
        let wheels = body_to_wheel(0.1, 0.0, TURNING_RADIUS);
        assert_eq!(wheels.right, 0.1);
        assert_eq!(wheels.left, 0.1);
    }

    #[test]
    fn test_rotation_only() {
        // Pure counter-clockwise rotation: right track forward, left backward
        let wheels = body_to_wheel(0.0, 1.0, TURNING_RADIUS);
        assert!(wheels.right > 0.0 && wheels.left < 0.0);
        assert!((wheels.right + wheels.left).abs() < 1e-12);
    }

    #[test]
    fn test_inverse_recovers_body_velocity() {
        let wheels = body_to_wheel(0.2, -0.7, TURNING_RADIUS);
        let (vx, va) = wheel_to_body(wheels, TURNING_RADIUS);
        assert!((vx - 0.2).abs() < 1e-12);
        assert!((va - -0.7).abs() < 1e-12);
    }

    #[test]
    fn test_clamped() {
        let wheels = WheelVelocities::new(0.5, -0.5).clamped(0.15);
        assert_eq!(wheels, WheelVelocities::new(0.15, -0.15));
    }
}
