// Define message types for the crawler ports

use serde::{Deserialize, Serialize};

// Velocity command from teleop/planner -> crawler, and measured velocity back
// vx, vy in m/s (robot frame), va in rad/s
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Velocity2D {
    pub vx: f64,
    pub vy: f64,
    pub va: f64,
}

// Flipper PWM command [%], one per sub-track motor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FlipperPwm {
    pub front_right: i32,
    pub front_left: i32,
    pub back_right: i32,
    pub back_left: i32,
}

// Externally observed orientation (IMU), radians, wrapped to ±π
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Orientation3D {
    pub r: f64,
    pub p: f64,
    pub y: f64,
}

// Odometry output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Pose3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

// Flipper angles [rad]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct FlipperAngles {
    pub front_right: f64,
    pub front_left: f64,
    pub back_right: f64,
    pub back_left: f64,
}

impl FlipperAngles {
    pub fn uniform(angle: f64) -> Self {
        Self {
            front_right: angle,
            front_left: angle,
            back_right: angle,
            back_left: angle,
        }
    }
}

/// Per-motor load [A], main drive first then front and back flippers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct MotorLoad {
    pub right: f64,
    pub left: f64,
    pub front_right: f64,
    pub front_left: f64,
    pub back_right: f64,
    pub back_left: f64,
}

impl MotorLoad {
    /// Returns loads as array [R, L, FR, FL, BR, BL]
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.right,
            self.left,
            self.front_right,
            self.front_left,
            self.back_right,
            self.back_left,
        ]
    }
}

/// Health status published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    FeedbackLost,
}
