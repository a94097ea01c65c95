// Timeouts, topics, motor configuration
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::failsafe::timeout_from_secs;

// Nominal execution rate used when no config file overrides it
pub const LOOP_HZ: u64 = 10;

// Time the microcontrollers need before their feedback frame is readable
pub const MOTOR_FEEDBACK_TIME: Duration = Duration::from_millis(40);

// Zenoh topics (component input ports)
pub const TOPIC_CMD_MODE: &str = "spider/crawler/cmd/mode";
pub const TOPIC_CMD_VELOCITY2D: &str = "spider/crawler/cmd/velocity2d";
pub const TOPIC_CMD_FLIPPER_PWM: &str = "spider/crawler/cmd/flipper_pwm";
pub const TOPIC_CMD_ORIENTATION3D: &str = "spider/crawler/cmd/orientation3d";

// Zenoh topics (component output ports)
pub const TOPIC_STATE_POSE3D: &str = "spider/crawler/state/pose3d";
pub const TOPIC_STATE_VELOCITY2D: &str = "spider/crawler/state/velocity2d";
pub const TOPIC_STATE_FLIPPER_ANGLE: &str = "spider/crawler/state/flipper_angle";
pub const TOPIC_STATE_MOTOR_LOAD: &str = "spider/crawler/state/motor_load";
pub const TOPIC_HEALTH: &str = "spider/crawler/state/health";

// Flipper angle used when nothing was persisted, or on pose clear
pub const FLIPPER_ANGLE_DEFAULT: f64 = PI / 2.0;

// Flipper angle state file, relative to $HOME
pub const FLIPPER_ANGLE_FILE: &str = ".FlipperAngle.txt";

// Orientation jump that counts as a ±180° wrap of the external signal
pub const CYCLE_THRESHOLD: f64 = PI;

// Encoder de-wrap: 65536 - 40000 covers ~5000 pulses/cycle with 4 late cycles
pub const PULSE_WRAP_THRESHOLD: i32 = 40_000;
pub const PULSE_COUNTER_SPAN: i32 = 65_536;

// Main motor PWM limits [%]
pub const PWM_DEADBAND: f64 = 10.0;
pub const PWM_LIMIT: f64 = 90.0;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Crawler tunables, one field per recognized option.
///
/// Missing keys in the JSON file fall back to the values the robot was
/// commissioned with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    pub wheel_radius: f64,
    pub pulley_radius: f64,
    pub turning_radius: f64,

    pub sh1_device_name: String,
    pub sh2_device_name: String,
    pub sh3_device_name: String,
    pub sh1_baudrate: String,
    pub sh2_baudrate: String,
    pub sh3_baudrate: String,

    pub main_motor_kp: f64,
    pub main_motor_ki: f64,
    pub main_motor_kd: f64,
    pub vx_gain: f64,
    pub va_gain: f64,

    pub main_motor_pulse: i32,
    pub main_motor_gear_ratio: f64,
    pub sub_motor_pulse: i32,
    pub sub_motor_gear_ratio: f64,

    pub r_main_motor_direction: i8,
    pub l_main_motor_direction: i8,
    pub r_front_sub_motor_direction: i8,
    pub l_front_sub_motor_direction: i8,
    pub r_back_sub_motor_direction: i8,
    pub l_back_sub_motor_direction: i8,

    pub main_motor_load_gain: f64,
    pub main_motor_load_base: f64,
    pub sub_motor_load_gain: f64,
    pub sub_motor_load_base: f64,

    pub failsafe_sec: f64,
    pub use_orientation3d_in: bool,

    pub loop_hz: u64,
    // Set to false to run without touching the serial devices
    pub motor_enabled: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            wheel_radius: 0.0769,
            pulley_radius: 0.0486,
            turning_radius: 0.0938,
            sh1_device_name: "/dev/ttyUSB0".to_string(),
            sh2_device_name: "/dev/ttyUSB1".to_string(),
            sh3_device_name: "/dev/ttyUSB2".to_string(),
            sh1_baudrate: "B38400".to_string(),
            sh2_baudrate: "B38400".to_string(),
            sh3_baudrate: "B38400".to_string(),
            main_motor_kp: 0.42,
            main_motor_ki: 4.00,
            main_motor_kd: 0.02,
            vx_gain: 1.0,
            va_gain: 1.0,
            main_motor_pulse: 1000,
            main_motor_gear_ratio: 243.0,
            sub_motor_pulse: 512,
            sub_motor_gear_ratio: 1080.0,
            r_main_motor_direction: 1,
            l_main_motor_direction: 1,
            r_front_sub_motor_direction: 1,
            l_front_sub_motor_direction: 1,
            r_back_sub_motor_direction: 1,
            l_back_sub_motor_direction: 1,
            main_motor_load_gain: 7.5,
            main_motor_load_base: 2.0,
            sub_motor_load_gain: 7.5,
            sub_motor_load_base: 2.0,
            failsafe_sec: 1.0,
            use_orientation3d_in: false,
            loop_hz: LOOP_HZ,
            motor_enabled: true,
        }
    }
}

impl CrawlerConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("wheel_radius", self.wheel_radius),
            ("pulley_radius", self.pulley_radius),
            ("turning_radius", self.turning_radius),
            ("main_motor_gear_ratio", self.main_motor_gear_ratio),
            ("sub_motor_gear_ratio", self.sub_motor_gear_ratio),
            ("failsafe_sec", self.failsafe_sec),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }

        if Duration::try_from_secs_f64(self.failsafe_sec).is_err() {
            return Err(ConfigError::Invalid(format!(
                "failsafe_sec out of range, got {}",
                self.failsafe_sec
            )));
        }

        if self.main_motor_pulse <= 0 || self.sub_motor_pulse <= 0 {
            return Err(ConfigError::Invalid(format!(
                "pulse counts must be positive, got main={} sub={}",
                self.main_motor_pulse, self.sub_motor_pulse
            )));
        }

        if self.loop_hz == 0 {
            return Err(ConfigError::Invalid("loop_hz must be non-zero".to_string()));
        }

        let directions = [
            ("r_main_motor_direction", self.r_main_motor_direction),
            ("l_main_motor_direction", self.l_main_motor_direction),
            ("r_front_sub_motor_direction", self.r_front_sub_motor_direction),
            ("l_front_sub_motor_direction", self.l_front_sub_motor_direction),
            ("r_back_sub_motor_direction", self.r_back_sub_motor_direction),
            ("l_back_sub_motor_direction", self.l_back_sub_motor_direction),
        ];
        for (name, value) in directions {
            if value != 1 && value != -1 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be 1 or -1, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    pub fn failsafe_timeout(&self) -> Duration {
        timeout_from_secs(self.failsafe_sec)
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.loop_hz as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CrawlerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sh1_baudrate, "B38400");
        assert_eq!(config.main_motor_pulse, 1000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CrawlerConfig =
            serde_json::from_str(r#"{"main_motor_kp": 0.5, "use_orientation3d_in": true}"#).unwrap();
        assert_eq!(config.main_motor_kp, 0.5);
        assert!(config.use_orientation3d_in);
        assert_eq!(config.turning_radius, 0.0938);
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let config = CrawlerConfig {
            l_back_sub_motor_direction: 2,
            ..CrawlerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_radius_rejected() {
        let config = CrawlerConfig {
            wheel_radius: 0.0,
            ..CrawlerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_failsafe_rejected() {
        let config = CrawlerConfig {
            failsafe_sec: 1e300,
            ..CrawlerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        // Still usable without validation
        assert_eq!(config.failsafe_timeout(), Duration::MAX);
        let config = CrawlerConfig {
            failsafe_sec: f64::NAN,
            ..CrawlerConfig::default()
        };
        assert_eq!(config.failsafe_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_loop_period() {
        let config = CrawlerConfig {
            loop_hz: 20,
            ..CrawlerConfig::default()
        };
        assert_eq!(config.loop_period(), Duration::from_millis(50));
    }
}
