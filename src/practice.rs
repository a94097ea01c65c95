// Simulation variant of the crawler control law
//
// Instead of talking to motor controllers, the simulated crawler turns the
// same velocity and flipper PWM inputs into joint targets for a physics
// engine: belt surface (or sprocket) velocities for the tracks and a PD
// torque for each flipper joint.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::failsafe::{FailsafeInput, timeout_from_secs};
use crate::messages::{FlipperPwm, Velocity2D};
use crate::motor::WheelVelocities;

/// Belt speed limit [m/s]
pub const VELOCITY_MAX: f64 = 0.15;

/// PWM at or below which a flipper holds its reference
pub const FLIPPER_PWM_MIN: i32 = 10;
pub const FLIPPER_PWM_MAX: i32 = 90;

const FLIPPER_KP: f64 = 1000.0;
const FLIPPER_KD: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    pub wheel_radius: f64,
    pub turning_radius: f64,
    pub main_motor_torque: f64,
    pub main_motor_rpm: f64,
    pub main_motor_gradient: f64,
    pub main_motor_gear_ratio: f64,
    pub sub_motor_torque: f64,
    pub sub_motor_rpm: f64,
    pub sub_motor_gradient: f64,
    pub sub_motor_gear_ratio: f64,
    pub failsafe_sec: f64,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            wheel_radius: 0.0769,
            turning_radius: 0.0938,
            main_motor_torque: 405e-3,
            main_motor_rpm: 5950.0,
            main_motor_gradient: 0.668e3,
            main_motor_gear_ratio: 243.0,
            sub_motor_torque: 105e-3,
            sub_motor_rpm: 7750.0,
            sub_motor_gradient: 6.54e3,
            sub_motor_gear_ratio: 1080.0,
            failsafe_sec: 1.0,
        }
    }
}

impl PracticeConfig {
    pub fn flipper_motor(&self) -> MotorSpec {
        MotorSpec {
            torque: self.sub_motor_torque,
            rpm: self.sub_motor_rpm,
            gradient: self.sub_motor_gradient,
            gear_ratio: self.sub_motor_gear_ratio,
        }
    }

    pub fn main_motor(&self) -> MotorSpec {
        MotorSpec {
            torque: self.main_motor_torque,
            rpm: self.main_motor_rpm,
            gradient: self.main_motor_gradient,
            gear_ratio: self.main_motor_gear_ratio,
        }
    }
}

/// DC motor datasheet values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSpec {
    /// Nominal torque [Nm]
    pub torque: f64,
    /// No-load speed [rpm]
    pub rpm: f64,
    /// Speed/torque gradient [rpm/Nm]
    pub gradient: f64,
    pub gear_ratio: f64,
}

/// How the simulated body drives its tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackModel {
    /// Belts take a surface velocity [m/s]
    SurfaceVelocity,
    /// Sprocket joints take an angular velocity [rad/s]
    Sprocket,
}

/// Track surface velocities, each clamped to ±[`VELOCITY_MAX`]
pub fn belt_velocities(cmd: &Velocity2D, turning_radius: f64) -> WheelVelocities {
    let half_turn = cmd.va * turning_radius / 2.0;
    WheelVelocities::new(cmd.vx + half_turn, cmd.vx - half_turn).clamped(VELOCITY_MAX)
}

/// Joint velocity targets for the right and left tracks
pub fn track_targets(cmd: &Velocity2D, config: &PracticeConfig, model: TrackModel) -> WheelVelocities {
    let belts = belt_velocities(cmd, config.turning_radius);
    match model {
        TrackModel::SurfaceVelocity => belts,
        TrackModel::Sprocket => WheelVelocities::new(
            belts.right / config.wheel_radius,
            belts.left / config.wheel_radius,
        ),
    }
}

/// Flipper joint driven by a PWM command through a simulated gear motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlipperPdController {
    motor: MotorSpec,
    motor_angle: f64,
    reference: f64,
}

impl FlipperPdController {
    pub fn new(motor: MotorSpec) -> Self {
        Self {
            motor,
            motor_angle: 0.0,
            reference: 0.0,
        }
    }

    /// Advance one physics step and return the joint torque
    ///
    /// `q`, `dq` are the joint angle and velocity, `timestep` the physics
    /// step [s].
    pub fn update(&mut self, pwm: i32, q: f64, dq: f64, timestep: f64) -> f64 {
        let pwm = pwm.clamp(-FLIPPER_PWM_MAX, FLIPPER_PWM_MAX);

        let rpm = (self.motor.rpm / 100.0) * f64::from(pwm.abs())
            - self.motor.gradient * self.motor.torque;
        let step = (rpm / 60.0) * timestep * (2.0 * std::f64::consts::PI);

        if pwm.abs() > FLIPPER_PWM_MIN {
            if pwm > 0 {
                self.motor_angle += step;
            } else {
                self.motor_angle -= step;
            }
        }

        self.reference = self.motor_angle / self.motor.gear_ratio;

        let limit = self.motor.torque * self.motor.gear_ratio;
        let u = (self.reference - q) * FLIPPER_KP + (0.0 - dq) * FLIPPER_KD;
        u.clamp(-limit, limit)
    }

    /// Target joint angle [rad]
    pub fn reference(&self) -> f64 {
        self.reference
    }

    pub fn motor_angle(&self) -> f64 {
        self.motor_angle
    }
}

/// Flipper joint state read back from the simulation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointState {
    pub q: f64,
    pub dq: f64,
}

/// Targets for one physics step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PracticeTargets {
    /// Right and left track, shared by the main and sub belts on each side
    pub tracks: WheelVelocities,
    /// Flipper torques [FR, FL, BR, BL]
    pub flipper_torque: [f64; 4],
}

/// Simulated crawler: watchdogged inputs in, joint targets out
pub struct PracticeCrawler {
    config: PracticeConfig,
    model: TrackModel,
    velocity: FailsafeInput<Velocity2D>,
    flipper_pwm: FailsafeInput<FlipperPwm>,
    flippers: [FlipperPdController; 4],
}

impl PracticeCrawler {
    pub fn new(config: PracticeConfig, model: TrackModel) -> Self {
        let timeout = timeout_from_secs(config.failsafe_sec);
        let flipper = FlipperPdController::new(config.flipper_motor());
        Self {
            config,
            model,
            velocity: FailsafeInput::new(Velocity2D::default(), timeout),
            flipper_pwm: FailsafeInput::new(FlipperPwm::default(), timeout),
            flippers: [flipper; 4],
        }
    }

    pub fn push_velocity(&mut self, cmd: Velocity2D, now: Instant) {
        self.velocity.push(cmd, now);
    }

    pub fn push_flipper_pwm(&mut self, pwm: FlipperPwm, now: Instant) {
        self.flipper_pwm.push(pwm, now);
    }

    /// Compute joint targets for one step; `joints` is [FR, FL, BR, BL]
    pub fn step(&mut self, now: Instant, joints: [JointState; 4], timestep: f64) -> PracticeTargets {
        let was_stale = self.velocity.is_stale();
        let cmd = self.velocity.poll(now);
        if !was_stale && self.velocity.is_stale() {
            warn!("Velocity command stale, stopping simulated tracks");
        }
        let pwm = self.flipper_pwm.poll(now);
        let pwm = [pwm.front_right, pwm.front_left, pwm.back_right, pwm.back_left];

        let mut flipper_torque = [0.0; 4];
        for (i, torque) in flipper_torque.iter_mut().enumerate() {
            *torque = self.flippers[i].update(pwm[i], joints[i].q, joints[i].dq, timestep);
        }

        PracticeTargets {
            tracks: track_targets(&cmd, &self.config, self.model),
            flipper_torque,
        }
    }

    pub fn flipper(&self, index: usize) -> Option<&FlipperPdController> {
        self.flippers.get(index)
    }
}
