// Per-motor state: configuration and feedback-derived kinematics
//
// One Motor converts a cycle's raw encoder count and the two analog values
// reported by the motor controller into wheel angle, velocity and load.

use std::f64::consts::PI;

use tracing::warn;

use crate::config::{PULSE_COUNTER_SPAN, PULSE_WRAP_THRESHOLD};

/// Static configuration of one motor, set once per activation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorConfig {
    /// Rotation direction, +1 or -1
    pub direction: i8,
    /// Encoder counts per motor shaft revolution (after quadrature)
    pub pulse_number: i32,
    /// Wheel (or pulley) radius [m]
    pub radius: f64,
    pub gear_ratio: f64,
    /// Volts -> ampere gain
    pub load_gain: f64,
    /// Volts at zero load
    pub load_base: f64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            direction: 1,
            pulse_number: 1,
            radius: 1.0,
            gear_ratio: 1.0,
            load_gain: 1.0,
            load_base: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Motor {
    config: MotorConfig,
    pulse_count: i32,
    load: f64,
    // Accumulated, never wrapped
    angle: f64,
    angular_velocity: f64,
    angular_acceleration: f64,
    velocity: f64,
    acceleration: f64,
}

impl Motor {
    pub fn new(config: MotorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Reset configuration and angle, then all feedback state
    pub fn init_data(&mut self) {
        self.config = MotorConfig::default();
        self.angle = 0.0;
        self.init_feedback_data();
    }

    /// Reset feedback state. The accumulated angle is kept.
    pub fn init_feedback_data(&mut self) {
        self.pulse_count = 0;
        self.load = 0.0;
        self.angular_velocity = 0.0;
        self.angular_acceleration = 0.0;
        self.velocity = 0.0;
        self.acceleration = 0.0;
    }

    /// Apply one cycle of feedback.
    ///
    /// `dt` is the measured interval since the previous cycle [s]. A
    /// non-positive or non-finite `dt` is rejected and the sample dropped,
    /// returning `false`.
    pub fn calc_feedback(
        &mut self,
        dt: f64,
        raw_pulse_count: i32,
        _speed_voltage: f64,
        load_voltage: f64,
    ) -> bool {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("Dropping motor feedback: invalid interval dt={}", dt);
            return false;
        }

        let old_pulse_count = self.pulse_count;
        let old_angular_velocity = self.angular_velocity;

        self.pulse_count = raw_pulse_count;

        // Sign follows the rotation direction
        self.load = (load_voltage - self.config.load_base)
            * self.config.load_gain
            * f64::from(self.config.direction);

        let diff = unwrap_pulse_diff(old_pulse_count, raw_pulse_count);

        let diff_angle = (2.0 * PI / (f64::from(self.config.pulse_number) * self.config.gear_ratio))
            * diff as f64
            * f64::from(self.config.direction);

        self.angle += diff_angle;
        self.angular_velocity = diff_angle / dt;
        self.angular_acceleration = (self.angular_velocity - old_angular_velocity) / dt;
        self.velocity = self.angular_velocity * self.config.radius;
        self.acceleration = self.angular_acceleration * self.config.radius;

        true
    }

    pub fn config(&self) -> &MotorConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: MotorConfig) {
        self.config = config;
    }

    pub fn direction(&self) -> i8 {
        self.config.direction
    }

    pub fn pulse_count(&self) -> i32 {
        self.pulse_count
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    pub fn set_angle(&mut self, angle: f64) {
        self.angle = angle;
    }

    pub fn angular_velocity(&self) -> f64 {
        self.angular_velocity
    }

    pub fn angular_acceleration(&self) -> f64 {
        self.angular_acceleration
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn acceleration(&self) -> f64 {
        self.acceleration
    }
}

/// Difference between two 16-bit counter samples, undoing one wrap
///
/// A jump of 40000 counts or more in either direction is taken as the
/// counter having wrapped rather than the motor having moved that far.
/// Computed in `i64` so any pair of 32-bit samples is representable.
pub fn unwrap_pulse_diff(previous: i32, current: i32) -> i64 {
    let span = i64::from(PULSE_COUNTER_SPAN);
    let threshold = i64::from(PULSE_WRAP_THRESHOLD);
    let diff = i64::from(current) - i64::from(previous);
    if diff <= -threshold {
        diff + span
    } else if diff >= threshold {
        diff - span
    } else {
        diff
    }
}
