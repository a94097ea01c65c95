// Motor control module for the Spider crawler
//
// Provides:
// - Per-motor feedback model (encoder de-wrap, angle, velocity, load)
// - Differential-drive kinematics for the main tracks
// - SH motor-controller serial protocol and per-cycle links
// - Main drive PID/odometry and flipper processors

mod driver;
pub mod kinematics;
pub mod main_processor;
pub mod mock;
pub mod model;
pub mod protocol;
pub mod sub_processor;

pub use driver::{MotorLink, SerialMotorLink};
pub use kinematics::{body_to_wheel, wheel_to_body, WheelVelocities};
pub use main_processor::{MainMotorProcessor, MainMotorTuning};
pub use mock::MockMotorLink;
pub use model::{Motor, MotorConfig};
pub use protocol::{Baudrate, Feedback, FeedbackError, ShCommunicator, ShError};
pub use sub_processor::SubMotorProcessor;
