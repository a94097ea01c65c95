// Continuous orientation from a wrapped (±π) external signal
//
// Each axis keeps a revolution counter. A jump below -π between two samples
// means the signal wrapped from +π to -π while still turning forward.

use std::f64::consts::PI;

use crate::config::CYCLE_THRESHOLD;
use crate::messages::Orientation3D;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrientationUnwrapper {
    last: Orientation3D,
    roll_cycle: i64,
    pitch_cycle: i64,
    yaw_cycle: i64,
}

impl OrientationUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a new raw sample
    pub fn update(&mut self, sample: Orientation3D) {
        self.roll_cycle += cycle_step(sample.r - self.last.r);
        self.pitch_cycle += cycle_step(sample.p - self.last.p);
        self.yaw_cycle += cycle_step(sample.y - self.last.y);
        self.last = sample;
    }

    /// Last sample plus whole revolutions
    pub fn unwrapped(&self) -> Orientation3D {
        Orientation3D {
            r: self.last.r + 2.0 * PI * self.roll_cycle as f64,
            p: self.last.p + 2.0 * PI * self.pitch_cycle as f64,
            y: self.last.y + 2.0 * PI * self.yaw_cycle as f64,
        }
    }

    /// Zero the counters. The last raw sample is kept for the next diff.
    pub fn reset(&mut self) {
        self.roll_cycle = 0;
        self.pitch_cycle = 0;
        self.yaw_cycle = 0;
    }

    /// Counters as (roll, pitch, yaw)
    pub fn cycles(&self) -> (i64, i64, i64) {
        (self.roll_cycle, self.pitch_cycle, self.yaw_cycle)
    }

    pub fn last(&self) -> Orientation3D {
        self.last
    }
}

fn cycle_step(diff: f64) -> i64 {
    if diff < -CYCLE_THRESHOLD {
        1
    } else if CYCLE_THRESHOLD < diff {
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaw(deg: f64) -> Orientation3D {
        Orientation3D {
            r: 0.0,
            p: 0.0,
            y: deg.to_radians(),
        }
    }

    #[test]
    fn test_forward_wrap_increments() {
        let mut unwrap = OrientationUnwrapper::new();
        unwrap.update(yaw(170.0));
        assert_eq!(unwrap.cycles(), (0, 0, 0));

        // diff = -340° < -180°
        unwrap.update(yaw(-170.0));
        assert_eq!(unwrap.cycles(), (0, 0, 1));
        assert!((unwrap.unwrapped().y - 190f64.to_radians()).abs() < 1e-12);

        // and back again
        unwrap.update(yaw(170.0));
        assert_eq!(unwrap.cycles(), (0, 0, 0));
        assert!((unwrap.unwrapped().y - 170f64.to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_backward_wrap_decrements() {
        let mut unwrap = OrientationUnwrapper::new();
        unwrap.update(yaw(-175.0));
        unwrap.update(yaw(175.0));
        assert_eq!(unwrap.cycles().2, -1);
        assert!((unwrap.unwrapped().y - (-185f64).to_radians()).abs() < 1e-12);
    }

    #[test]
    fn test_continuous_rotation_is_monotonic() {
        let mut unwrap = OrientationUnwrapper::new();
        let mut previous = f64::NEG_INFINITY;
        for step in 0..100 {
            let true_deg = step as f64 * 20.0;
            let wrapped = (true_deg + 180.0).rem_euclid(360.0) - 180.0;
            unwrap.update(yaw(wrapped));
            let y = unwrap.unwrapped().y;
            assert!((y - true_deg.to_radians()).abs() < 1e-9, "step {}", step);
            assert!(y > previous);
            previous = y;
        }
    }

    #[test]
    fn test_axes_independent_and_reset() {
        let mut unwrap = OrientationUnwrapper::new();
        unwrap.update(Orientation3D { r: 3.0, p: -3.0, y: 0.0 });
        unwrap.update(Orientation3D { r: -3.0, p: 3.0, y: 0.0 });
        assert_eq!(unwrap.cycles(), (1, -1, 0));
        unwrap.reset();
        assert_eq!(unwrap.cycles(), (0, 0, 0));
        assert_eq!(unwrap.last().r, -3.0);
    }
}
