// Flipper (sub-track) axis: open-loop PWM commands and angle/load feedback

use tracing::debug;

use super::model::{Motor, MotorConfig};
use super::protocol::{parse_feedback, sub_command};

#[derive(Debug, Clone, Default)]
pub struct SubMotorProcessor {
    motor_r: Motor,
    motor_l: Motor,
}

impl SubMotorProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init_data(&mut self) {
        self.motor_r.init_data();
        self.motor_l.init_data();
    }

    pub fn init_feedback_data(&mut self) {
        self.motor_r.init_feedback_data();
        self.motor_l.init_feedback_data();
    }

    pub fn set_config_r(&mut self, config: MotorConfig) {
        self.motor_r.set_config(config);
    }

    pub fn set_config_l(&mut self, config: MotorConfig) {
        self.motor_l.set_config(config);
    }

    /// PWM values are passed through unclamped, sign flipped per motor direction
    pub fn gen_move_command(&self, pwm_r: i32, pwm_l: i32) -> String {
        sub_command(
            pwm_r.saturating_mul(i32::from(self.motor_r.direction())),
            pwm_l.saturating_mul(i32::from(self.motor_l.direction())),
        )
    }

    pub fn gen_stop_command(&self) -> String {
        self.gen_move_command(0, 0)
    }

    /// Apply one feedback frame; `false` leaves both motors untouched
    pub fn analyze_feedback(&mut self, dt: f64, feedback: &str) -> bool {
        let frame = match parse_feedback(feedback) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Sub motor feedback rejected: {}", e);
                return false;
            }
        };
        if !(dt.is_finite() && dt > 0.0) {
            debug!("Sub motor feedback rejected: dt={}", dt);
            return false;
        }

        self.motor_r
            .calc_feedback(dt, frame.pulse_r, frame.speed_voltage_r, frame.load_voltage_r);
        self.motor_l
            .calc_feedback(dt, frame.pulse_l, frame.speed_voltage_l, frame.load_voltage_l);
        true
    }

    pub fn angle_r(&self) -> f64 {
        self.motor_r.angle()
    }

    pub fn set_angle_r(&mut self, angle: f64) {
        self.motor_r.set_angle(angle);
    }

    pub fn angle_l(&self) -> f64 {
        self.motor_l.angle()
    }

    pub fn set_angle_l(&mut self, angle: f64) {
        self.motor_l.set_angle(angle);
    }

    pub fn load_r(&self) -> f64 {
        self.motor_r.load()
    }

    pub fn load_l(&self) -> f64 {
        self.motor_l.load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn flipper(direction: i8) -> MotorConfig {
        MotorConfig {
            direction,
            pulse_number: 512,
            radius: 0.0486,
            gear_ratio: 1080.0,
            load_gain: 7.5,
            load_base: 2.0,
        }
    }

    #[test]
    fn test_move_command_applies_direction() {
        let mut p = SubMotorProcessor::new();
        p.set_config_r(flipper(1));
        p.set_config_l(flipper(-1));
        assert_eq!(p.gen_move_command(40, 40), "s[40:-40]e");
        // No clamping on the flipper axis
        assert_eq!(p.gen_move_command(-150, 5), "s[-150:-5]e");
        assert_eq!(p.gen_stop_command(), "s[0:0]e");
    }

    #[test]
    fn test_move_command_saturates_extreme_pwm() {
        let mut p = SubMotorProcessor::new();
        p.set_config_r(flipper(-1));
        p.set_config_l(flipper(-1));
        assert_eq!(
            p.gen_move_command(i32::MIN, i32::MAX),
            format!("s[{}:{}]e", i32::MAX, -i32::MAX)
        );
    }

    #[test]
    fn test_feedback_accumulates_angle() {
        let mut p = SubMotorProcessor::new();
        p.set_config_r(flipper(1));
        p.set_config_l(flipper(1));
        p.set_angle_r(PI / 2.0);
        p.set_angle_l(PI / 2.0);

        // 512 * 1080 / 4 = 138240 counts is a quarter turn; step it in 8 frames
        let mut raw = 0i32;
        for _ in 0..8 {
            raw = (raw + 17_280) % 65_536;
            let frame = format!("s[{:X}:0][0.0:2.4][0.0:2.0]e", raw);
            assert!(p.analyze_feedback(0.1, &frame));
        }
        assert!((p.angle_r() - PI).abs() < 1e-9);
        assert!((p.angle_l() - PI / 2.0).abs() < 1e-12);
        assert!((p.load_r() - 3.0).abs() < 1e-12);
        assert!(p.load_l().abs() < 1e-12);
    }

    #[test]
    fn test_bad_feedback_keeps_state() {
        let mut p = SubMotorProcessor::new();
        p.set_config_r(flipper(1));
        p.set_angle_r(1.0);
        assert!(!p.analyze_feedback(0.1, "s[10:10]e"));
        assert!(!p.analyze_feedback(0.1, ""));
        assert_eq!(p.angle_r(), 1.0);
        assert_eq!(p.load_r(), 0.0);
    }
}
