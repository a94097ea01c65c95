// Main drive: PID velocity control and odometry for the left/right tracks

use nalgebra::{Rotation3, Vector3};
use tracing::debug;

use super::kinematics::{body_to_wheel, wheel_to_body, WheelVelocities};
use super::model::{Motor, MotorConfig};
use super::protocol::{main_command, parse_feedback};
use crate::config::{PWM_DEADBAND, PWM_LIMIT};
use crate::messages::Pose3D;

/// Controller gains and geometry of the main drive
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainMotorTuning {
    pub turning_radius: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Correction applied to measured track velocity
    pub vx_gain: f64,
    /// Correction applied to the odometry yaw rate
    pub va_gain: f64,
}

impl Default for MainMotorTuning {
    fn default() -> Self {
        Self {
            turning_radius: 1.0,
            kp: 1.0,
            ki: 1.0,
            kd: 1.0,
            vx_gain: 1.0,
            va_gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MainMotorProcessor {
    tuning: MainMotorTuning,
    motor_r: Motor,
    motor_l: Motor,
    vx: f64,
    vy: f64,
    va: f64,
    pose: Pose3D,
    integral_r: f64,
    integral_l: f64,
}

impl MainMotorProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset tuning, pose, both motors and all feedback state
    pub fn init_data(&mut self) {
        self.tuning = MainMotorTuning::default();
        self.pose = Pose3D::default();
        self.motor_r.init_data();
        self.motor_l.init_data();
        self.init_feedback_data();
    }

    /// Reset measured velocity, PID integrals and motor feedback. Pose is kept.
    pub fn init_feedback_data(&mut self) {
        self.vx = 0.0;
        self.vy = 0.0;
        self.va = 0.0;
        self.integral_r = 0.0;
        self.integral_l = 0.0;
        self.motor_r.init_feedback_data();
        self.motor_l.init_feedback_data();
    }

    pub fn set_config(&mut self, tuning: MainMotorTuning) {
        self.tuning = tuning;
    }

    pub fn set_config_r(&mut self, config: MotorConfig) {
        self.motor_r.set_config(config);
    }

    pub fn set_config_l(&mut self, config: MotorConfig) {
        self.motor_l.set_config(config);
    }

    /// Build the move command for a desired body velocity
    ///
    /// Each track gets `KP*e + KI*∫e + KD*(-a)` in percent plus a ±10%
    /// offset the motors need to start turning, clamped to 10..90% in the
    /// direction of travel. A zero target sends 10% and clears that
    /// track's integral.
    pub fn gen_move_command(&mut self, vx: f64, _vy: f64, va: f64) -> String {
        let target = body_to_wheel(vx, va, self.tuning.turning_radius);

        let pwm_r = if target.right < 0.0 || target.right > 0.0 {
            clamp_pwm(self.drive_pwm(target.right, &self.motor_r, self.integral_r))
        } else {
            self.integral_r = 0.0;
            PWM_DEADBAND
        };

        let pwm_l = if target.left < 0.0 || target.left > 0.0 {
            clamp_pwm(self.drive_pwm(target.left, &self.motor_l, self.integral_l))
        } else {
            self.integral_l = 0.0;
            PWM_DEADBAND
        };

        // Commands are in motor rotation sign, not robot frame
        main_command(
            pwm_r * f64::from(self.motor_r.direction()),
            pwm_l * f64::from(self.motor_l.direction()),
        )
    }

    pub fn gen_stop_command(&mut self) -> String {
        self.gen_move_command(0.0, 0.0, 0.0)
    }

    fn drive_pwm(&self, target: f64, motor: &Motor, integral: f64) -> f64 {
        let gain = self.tuning.vx_gain;
        let pid = self.tuning.kp * (target - motor.velocity() * gain) * 100.0
            + self.tuning.ki * integral * 100.0
            + self.tuning.kd * (0.0 - motor.acceleration() * gain) * 100.0;

        if target < 0.0 {
            pid - PWM_DEADBAND
        } else {
            pid + PWM_DEADBAND
        }
    }

    /// Apply one feedback frame.
    ///
    /// Returns `false` and leaves every field untouched when the frame does
    /// not scan or `dt` is not a positive interval.
    pub fn analyze_feedback(&mut self, dt: f64, vx: f64, _vy: f64, va: f64, feedback: &str) -> bool {
        let frame = match parse_feedback(feedback) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Main motor feedback rejected: {}", e);
                return false;
            }
        };
        if !(dt.is_finite() && dt > 0.0) {
            debug!("Main motor feedback rejected: dt={}", dt);
            return false;
        }

        self.motor_r
            .calc_feedback(dt, frame.pulse_r, frame.speed_voltage_r, frame.load_voltage_r);
        self.motor_l
            .calc_feedback(dt, frame.pulse_l, frame.speed_voltage_l, frame.load_voltage_l);

        let target = body_to_wheel(vx, va, self.tuning.turning_radius);
        let gain = self.tuning.vx_gain;
        self.integral_r += (target.right - self.motor_r.velocity() * gain) * dt;
        self.integral_l += (target.left - self.motor_l.velocity() * gain) * dt;

        true
    }

    fn measured_wheels(&self) -> WheelVelocities {
        WheelVelocities::new(self.motor_r.velocity(), self.motor_l.velocity())
    }

    /// Wheel-only odometry, midpoint heading integration
    pub fn calc_odometry(&mut self, dt: f64) {
        let (vx, va) = wheel_to_body(self.measured_wheels(), self.tuning.turning_radius);
        self.vx = vx * self.tuning.vx_gain;
        self.va = va * self.tuning.va_gain;

        let heading = self.pose.yaw + self.va * dt / 2.0;
        self.pose.x += self.vx * dt * heading.cos();
        self.pose.y += self.vx * dt * heading.sin();
        self.pose.yaw += self.va * dt;
    }

    /// Odometry fused with an external absolute orientation.
    ///
    /// `roll`, `pitch`, `yaw` must already be unwrapped. The forward step
    /// is rotated by the mean of the previous and new orientation
    /// (yaw, then pitch, then roll) and the orientation is taken as given.
    pub fn calc_odometry_3d(&mut self, roll: f64, pitch: f64, yaw: f64, dt: f64) {
        let (vx, _) = wheel_to_body(self.measured_wheels(), self.tuning.turning_radius);
        self.vx = vx * self.tuning.vx_gain;
        self.va = (yaw - self.pose.yaw) / dt;

        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), (self.pose.yaw + yaw) / 2.0)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), (self.pose.pitch + pitch) / 2.0)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), (self.pose.roll + roll) / 2.0);
        let step = rotation * Vector3::new(self.vx * dt, 0.0, 0.0);

        self.pose.x += step.x;
        self.pose.y += step.y;
        self.pose.z += step.z;
        self.pose.roll = roll;
        self.pose.pitch = pitch;
        self.pose.yaw = yaw;
    }

    /// Zero position and orientation
    pub fn clear_pose(&mut self) {
        self.pose = Pose3D::default();
    }

    pub fn pose(&self) -> Pose3D {
        self.pose
    }

    pub fn tuning(&self) -> &MainMotorTuning {
        &self.tuning
    }

    pub fn vx(&self) -> f64 {
        self.vx
    }

    pub fn vy(&self) -> f64 {
        self.vy
    }

    pub fn va(&self) -> f64 {
        self.va
    }

    pub fn integral_r(&self) -> f64 {
        self.integral_r
    }

    pub fn integral_l(&self) -> f64 {
        self.integral_l
    }

    pub fn motor_r(&self) -> &Motor {
        &self.motor_r
    }

    pub fn motor_l(&self) -> &Motor {
        &self.motor_l
    }

    pub fn load_r(&self) -> f64 {
        self.motor_r.load()
    }

    pub fn load_l(&self) -> f64 {
        self.motor_l.load()
    }
}

/// Keep a PWM value inside 10..90% of its own sign; zero counts as negative
fn clamp_pwm(pwm: f64) -> f64 {
    if pwm > 0.0 {
        pwm.clamp(PWM_DEADBAND, PWM_LIMIT)
    } else {
        pwm.clamp(-PWM_LIMIT, -PWM_DEADBAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tuning() -> MainMotorTuning {
        MainMotorTuning {
            turning_radius: 0.0938,
            kp: 0.42,
            ki: 4.0,
            kd: 0.02,
            vx_gain: 1.0,
            va_gain: 1.0,
        }
    }

    fn track() -> MotorConfig {
        MotorConfig {
            direction: 1,
            pulse_number: 1000,
            radius: 0.0769,
            gear_ratio: 243.0,
            load_gain: 7.5,
            load_base: 2.0,
        }
    }

    fn processor() -> MainMotorProcessor {
        let mut p = MainMotorProcessor::new();
        p.set_config(tuning());
        p.set_config_r(track());
        p.set_config_l(track());
        p
    }

    fn pwm_pair(command: &str) -> (f64, f64) {
        let inner = command
            .strip_prefix("s[")
            .and_then(|s| s.strip_suffix("]e"))
            .unwrap();
        let (r, l) = inner.split_once(':').unwrap();
        (r.parse().unwrap(), l.parse().unwrap())
    }

    #[test]
    fn test_first_cycle_forward_command() {
        // 0.42 * 0.1 * 100 + 10 with zero measured state
        let mut p = processor();
        assert_eq!(p.gen_move_command(0.1, 0.0, 0.0), "s[14.20:14.20]e");
    }

    #[test]
    fn test_stop_command_and_integral_reset() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[0:0][0.0:2.0][0.0:2.0]e"));
        assert!(p.integral_r() > 0.0);
        assert!(p.integral_l() > 0.0);

        assert_eq!(p.gen_stop_command(), "s[10.00:10.00]e");
        assert_eq!(p.integral_r(), 0.0);
        assert_eq!(p.integral_l(), 0.0);
    }

    #[test]
    fn test_pwm_clamped_with_sign() {
        let mut p = processor();
        for &vx in &[-5.0, -0.3, -0.001, 0.001, 0.3, 5.0] {
            for &va in &[-3.0, 0.0, 3.0] {
                let (r, l) = pwm_pair(&p.gen_move_command(vx, 0.0, va));
                let target = body_to_wheel(vx, va, 0.0938);
                for (pwm, wheel) in [(r, target.right), (l, target.left)] {
                    if wheel == 0.0 {
                        assert_eq!(pwm, 10.0);
                    } else {
                        assert!((10.0..=90.0).contains(&pwm.abs()), "pwm {}", pwm);
                        assert_eq!(pwm > 0.0, wheel > 0.0, "vx={} va={}", vx, va);
                    }
                }
            }
        }
    }

    #[test]
    fn test_saturation_values() {
        let mut p = processor();
        assert_eq!(p.gen_move_command(5.0, 0.0, 0.0), "s[90.00:90.00]e");
        assert_eq!(p.gen_move_command(-5.0, 0.0, 0.0), "s[-90.00:-90.00]e");
        // Tiny reverse request still drives at the minimum
        assert_eq!(p.gen_move_command(-0.0001, 0.0, 0.0), "s[-10.00:-10.00]e");
    }

    #[test]
    fn test_direction_applied_on_transmit() {
        let mut p = processor();
        p.set_config_l(MotorConfig {
            direction: -1,
            ..track()
        });
        assert_eq!(p.gen_move_command(0.1, 0.0, 0.0), "s[14.20:-14.20]e");
    }

    #[test]
    fn test_analyze_feedback_rejects_bad_frames() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[100:100][0.0:2.0][0.0:2.0]e"));
        let before_r = p.motor_r().pulse_count();
        let before_integral = p.integral_r();

        assert!(!p.analyze_feedback(0.1, 0.1, 0.0, 0.0, ""));
        assert!(!p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[200:200][0.0:2.0]e"));
        assert!(!p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[10.00:10.00]e"));

        assert_eq!(p.motor_r().pulse_count(), before_r);
        assert_eq!(p.integral_r(), before_integral);
    }

    #[test]
    fn test_analyze_feedback_full_width_counts() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.0, 0.0, 0.0, "s[80000000:0][0.0:2.0][0.0:2.0]e"));
        assert!(p.analyze_feedback(0.1, 0.0, 0.0, 0.0, "s[7FFFFFFF:0][0.0:2.0][0.0:2.0]e"));
        assert_eq!(p.motor_r().pulse_count(), i32::MAX);
        assert!(p.motor_r().velocity().is_finite());
        p.calc_odometry(0.1);
        assert!(p.pose().x.is_finite());
    }

    #[test]
    fn test_analyze_feedback_updates_motors_and_integral() {
        let mut p = processor();
        // 0x3E8 = 1000 counts on both tracks in 0.1 s
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[3E8:3E8][1.0:3.0][1.0:2.5]e"));
        let expected_velocity = 2.0 * PI / 243_000.0 * 1000.0 / 0.1 * 0.0769;
        assert!((p.motor_r().velocity() - expected_velocity).abs() < 1e-12);
        assert!((p.load_r() - 7.5).abs() < 1e-12);
        assert!((p.load_l() - 3.75).abs() < 1e-12);
        let expected_integral = (0.1 - expected_velocity) * 0.1;
        assert!((p.integral_r() - expected_integral).abs() < 1e-12);
    }

    #[test]
    fn test_odometry_zero_motion_is_idempotent() {
        let mut p = processor();
        for _ in 0..50 {
            assert!(p.analyze_feedback(0.1, 0.0, 0.0, 0.0, "s[0:0][0.0:2.0][0.0:2.0]e"));
            p.calc_odometry(0.1);
        }
        assert_eq!(p.pose(), Pose3D::default());
    }

    #[test]
    fn test_odometry_straight_line() {
        let mut p = processor();
        let mut pulses = 0;
        for _ in 0..10 {
            pulses += 1000;
            let frame = format!("s[{:X}:{:X}][0.0:2.0][0.0:2.0]e", pulses, pulses);
            assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, &frame));
            p.calc_odometry(0.1);
        }
        let per_cycle = 2.0 * PI / 243_000.0 * 1000.0 * 0.0769;
        assert!((p.pose().x - per_cycle * 10.0).abs() < 1e-9);
        assert!(p.pose().y.abs() < 1e-12);
        assert!(p.pose().yaw.abs() < 1e-12);
    }

    #[test]
    fn test_odometry_midpoint_heading() {
        let mut p = processor();
        // Right track forward, left track still: turn while moving
        assert!(p.analyze_feedback(0.1, 0.0, 0.0, 0.0, "s[3E8:0][0.0:2.0][0.0:2.0]e"));
        p.calc_odometry(0.1);

        let v_r = 2.0 * PI / 243_000.0 * 1000.0 / 0.1 * 0.0769;
        let vx = v_r / 2.0;
        let va = v_r / (2.0 * 0.0938);
        let heading = va * 0.1 / 2.0;
        assert!((p.vx() - vx).abs() < 1e-12);
        assert!((p.va() - va).abs() < 1e-12);
        assert!((p.pose().x - vx * 0.1 * heading.cos()).abs() < 1e-12);
        assert!((p.pose().y - vx * 0.1 * heading.sin()).abs() < 1e-12);
        assert!((p.pose().yaw - va * 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_odometry_3d_uses_mean_orientation() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[3E8:3E8][0.0:2.0][0.0:2.0]e"));
        p.calc_odometry_3d(0.0, 0.0, PI / 2.0, 0.1);

        let step = 2.0 * PI / 243_000.0 * 1000.0 * 0.0769;
        // Mean yaw is 45°
        let half = step * (PI / 4.0).cos();
        assert!((p.pose().x - half).abs() < 1e-12);
        assert!((p.pose().y - half).abs() < 1e-12);
        assert!(p.pose().z.abs() < 1e-12);
        assert_eq!(p.pose().yaw, PI / 2.0);
        assert!((p.va() - (PI / 2.0) / 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_odometry_3d_pitch_climbs() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[3E8:3E8][0.0:2.0][0.0:2.0]e"));
        // Nose up: positive pitch about y maps forward motion to -z
        p.calc_odometry_3d(0.0, -PI / 6.0, 0.0, 0.1);
        assert!(p.pose().z > 0.0);
        assert_eq!(p.pose().pitch, -PI / 6.0);
    }

    #[test]
    fn test_clear_pose_and_feedback_reset() {
        let mut p = processor();
        assert!(p.analyze_feedback(0.1, 0.1, 0.0, 0.0, "s[3E8:3E8][0.0:2.0][0.0:2.0]e"));
        p.calc_odometry(0.1);
        assert!(p.pose().x > 0.0);

        p.init_feedback_data();
        assert_eq!(p.vx(), 0.0);
        assert_eq!(p.motor_r().velocity(), 0.0);
        assert!(p.pose().x > 0.0);

        p.clear_pose();
        assert_eq!(p.pose(), Pose3D::default());
    }
}
