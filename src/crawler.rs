// Crawler control loop
//
// One execute cycle:
//   1. measure dt since the previous cycle
//   2. latch inputs (mode, velocity, flipper PWM, orientation) through their watchdogs
//   3. clear pose and flipper angles when the operator asks for it
//   4. open SH1/SH2/SH3 and send move commands
//   5. wait for the controllers to answer
//   6. analyze feedback, run odometry, publish and persist state
// A motor group whose link fails is skipped for that cycle; the others run.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{CrawlerConfig, FLIPPER_ANGLE_DEFAULT, MOTOR_FEEDBACK_TIME};
use crate::failsafe::FailsafeInput;
use crate::flipper_store::FlipperAngleStore;
use crate::messages::{
    FlipperAngles, FlipperPwm, MotorLoad, Orientation3D, Pose3D, RuntimeHealth, Velocity2D,
};
use crate::mode::Mode;
use crate::motor::{
    MainMotorProcessor, MainMotorTuning, MockMotorLink, MotorConfig, MotorLink, SerialMotorLink,
    SubMotorProcessor,
};
use crate::orientation::OrientationUnwrapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlerState {
    Created,
    Initialized,
    Active,
    Inactive,
}

/// The three motor controller links
pub struct MotorLinks {
    /// SH1, main tracks
    pub main: Box<dyn MotorLink>,
    /// SH2, front flippers
    pub front: Box<dyn MotorLink>,
    /// SH3, back flippers
    pub back: Box<dyn MotorLink>,
}

impl MotorLinks {
    pub fn serial(config: &CrawlerConfig) -> Self {
        Self {
            main: Box::new(SerialMotorLink::new(
                "SH1",
                &config.sh1_device_name,
                &config.sh1_baudrate,
            )),
            front: Box::new(SerialMotorLink::new(
                "SH2",
                &config.sh2_device_name,
                &config.sh2_baudrate,
            )),
            back: Box::new(SerialMotorLink::new(
                "SH3",
                &config.sh3_device_name,
                &config.sh3_baudrate,
            )),
        }
    }

    /// In-memory links; the handles observe what the crawler sends
    pub fn mock() -> (Self, [MockMotorLink; 3]) {
        let handles = [
            MockMotorLink::new("SH1"),
            MockMotorLink::new("SH2"),
            MockMotorLink::new("SH3"),
        ];
        let links = Self {
            main: Box::new(handles[0].clone()),
            front: Box::new(handles[1].clone()),
            back: Box::new(handles[2].clone()),
        };
        (links, handles)
    }

    fn all_mut(&mut self) -> [&mut Box<dyn MotorLink>; 3] {
        [&mut self.main, &mut self.front, &mut self.back]
    }
}

/// Samples that arrived since the previous cycle
#[derive(Debug, Clone, Default)]
pub struct CrawlerInputs {
    pub mode: Option<Vec<i32>>,
    pub velocity: Option<Velocity2D>,
    pub flipper_pwm: Option<FlipperPwm>,
    pub orientation: Option<Orientation3D>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CrawlerOutputs {
    pub pose: Pose3D,
    pub velocity: Velocity2D,
    pub flipper_angle: FlipperAngles,
    pub motor_load: MotorLoad,
}

pub struct Crawler {
    config: CrawlerConfig,
    state: CrawlerState,
    links: MotorLinks,
    main: MainMotorProcessor,
    front: SubMotorProcessor,
    back: SubMotorProcessor,

    mode: FailsafeInput<Mode>,
    velocity: FailsafeInput<Velocity2D>,
    flipper_pwm: FailsafeInput<FlipperPwm>,
    orientation: OrientationUnwrapper,

    store: FlipperAngleStore,
    save_failed: bool,
    // SH1, SH2, SH3 failed on their last cycle
    link_failed: [bool; 3],
    feedback_wait: Duration,
    last_tick: Instant,
    health: RuntimeHealth,
}

impl Crawler {
    pub fn new(config: CrawlerConfig, links: MotorLinks, store: FlipperAngleStore) -> Self {
        let timeout = config.failsafe_timeout();
        Self {
            config,
            state: CrawlerState::Created,
            links,
            main: MainMotorProcessor::new(),
            front: SubMotorProcessor::new(),
            back: SubMotorProcessor::new(),
            mode: FailsafeInput::new(Mode::default(), timeout),
            velocity: FailsafeInput::new(Velocity2D::default(), timeout),
            flipper_pwm: FailsafeInput::new(FlipperPwm::default(), timeout),
            orientation: OrientationUnwrapper::new(),
            store,
            save_failed: false,
            link_failed: [false; 3],
            feedback_wait: MOTOR_FEEDBACK_TIME,
            last_tick: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
        }
    }

    /// Override the pause between sending commands and reading feedback
    pub fn with_feedback_wait(mut self, wait: Duration) -> Self {
        self.feedback_wait = wait;
        self
    }

    pub fn state(&self) -> CrawlerState {
        self.state
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    pub fn mode(&self) -> &Mode {
        self.mode.value()
    }

    pub fn main_processor(&self) -> &MainMotorProcessor {
        &self.main
    }

    pub fn orientation(&self) -> &OrientationUnwrapper {
        &self.orientation
    }

    /// Links (SH1, SH2, SH3) whose last cycle failed to open or answer
    pub fn failed_links(&self) -> [bool; 3] {
        self.link_failed
    }

    /// Reset processors, pose and orientation counters
    pub fn initialize(&mut self) -> bool {
        if self.state == CrawlerState::Active {
            warn!("Initialize refused: crawler is active");
            return false;
        }

        self.main.init_data();
        self.front.init_data();
        self.back.init_data();
        self.orientation = OrientationUnwrapper::new();
        self.reset_inputs();

        self.state = CrawlerState::Initialized;
        info!("Crawler initialized");
        true
    }

    /// Apply configuration and restore flipper angles
    pub async fn activate(&mut self, now: Instant) -> bool {
        match self.state {
            CrawlerState::Initialized | CrawlerState::Inactive => {}
            state => {
                warn!("Activate refused in state {:?}", state);
                return false;
            }
        }

        self.apply_config();
        self.reset_inputs();

        // First cycle sees one nominal period
        self.last_tick = now.checked_sub(self.config.loop_period()).unwrap_or(now);

        let angles = self.store.load();
        self.front.set_angle_r(angles.front_right);
        self.front.set_angle_l(angles.front_left);
        self.back.set_angle_r(angles.back_right);
        self.back.set_angle_l(angles.back_left);
        self.link_failed = [false; 3];

        self.state = CrawlerState::Active;
        info!(
            "Crawler active: {}Hz, failsafe {}s, orientation fusion {}",
            self.config.loop_hz,
            self.config.failsafe_sec,
            if self.config.use_orientation3d_in { "on" } else { "off" }
        );
        true
    }

    /// Run one control cycle. Returns `None` when the crawler is not active.
    pub async fn execute(&mut self, now: Instant, inputs: CrawlerInputs) -> Option<CrawlerOutputs> {
        if self.state != CrawlerState::Active {
            warn!("Execute refused in state {:?}", self.state);
            return None;
        }

        // 1. Cycle period
        let dt = now.saturating_duration_since(self.last_tick).as_secs_f64();
        self.last_tick = now;

        // 2. Inputs
        let (mode, velocity, flipper_pwm) = self.read_inputs(now, inputs);

        // 3. Pose clear
        if mode.pose_clear {
            debug!("Clearing crawler pose and flipper angles");
            self.main.clear_pose();
            self.front.set_angle_r(FLIPPER_ANGLE_DEFAULT);
            self.front.set_angle_l(FLIPPER_ANGLE_DEFAULT);
            self.back.set_angle_r(FLIPPER_ANGLE_DEFAULT);
            self.back.set_angle_l(FLIPPER_ANGLE_DEFAULT);
            self.orientation.reset();
        }

        // 4. Commands
        let move_main = self.main.gen_move_command(velocity.vx, velocity.vy, velocity.va);
        let move_front = self
            .front
            .gen_move_command(flipper_pwm.front_right, flipper_pwm.front_left);
        let move_back = self
            .back
            .gen_move_command(flipper_pwm.back_right, flipper_pwm.back_left);

        let mut faults = [
            open_and_send(self.links.main.as_mut(), &move_main),
            open_and_send(self.links.front.as_mut(), &move_front),
            open_and_send(self.links.back.as_mut(), &move_back),
        ];

        // 5. Controllers answer after a fixed delay
        tokio::time::sleep(self.feedback_wait).await;

        // 6. Feedback and odometry
        let mut main_ok = false;
        if self.links.main.is_open() {
            let feedback = self.links.main.recv();
            if self
                .main
                .analyze_feedback(dt, velocity.vx, velocity.vy, velocity.va, &feedback)
            {
                main_ok = true;
                if self.config.use_orientation3d_in {
                    let o = self.orientation.unwrapped();
                    self.main.calc_odometry_3d(o.r, o.p, o.y, dt);
                } else {
                    self.main.calc_odometry(dt);
                }
            } else {
                faults[0].get_or_insert_with(|| format!("unusable feedback {:?}", feedback));
            }
        }

        if self.links.front.is_open() {
            let feedback = self.links.front.recv();
            if !self.front.analyze_feedback(dt, &feedback) {
                faults[1].get_or_insert_with(|| format!("unusable feedback {:?}", feedback));
            }
        }

        if self.links.back.is_open() {
            let feedback = self.links.back.recv();
            if !self.back.analyze_feedback(dt, &feedback) {
                faults[2].get_or_insert_with(|| format!("unusable feedback {:?}", feedback));
            }
        }

        for ((link, failed), fault) in self
            .links
            .all_mut()
            .into_iter()
            .zip(self.link_failed.iter_mut())
            .zip(faults)
        {
            report_fault(link.name(), failed, fault);
            link.close();
        }

        let outputs = self.outputs();
        self.save_flipper_angles(&outputs.flipper_angle);
        self.update_health(main_ok);

        Some(outputs)
    }

    /// Zero feedback state, stop every motor and drain pending answers
    pub async fn deactivate(&mut self) -> bool {
        if self.state != CrawlerState::Active {
            warn!("Deactivate refused in state {:?}", self.state);
            return false;
        }

        self.main.init_feedback_data();
        self.front.init_feedback_data();
        self.back.init_feedback_data();

        let stop_main = self.main.gen_stop_command();
        let stop_front = self.front.gen_stop_command();
        let stop_back = self.back.gen_stop_command();
        let stops = [
            (self.links.main.as_mut(), stop_main),
            (self.links.front.as_mut(), stop_front),
            (self.links.back.as_mut(), stop_back),
        ];
        for (link, stop) in stops {
            if let Some(fault) = open_and_send(link, &stop) {
                warn!("{} stop not delivered: {}", link.name(), fault);
            }
        }

        tokio::time::sleep(self.feedback_wait).await;
        self.drain_and_close();

        self.state = CrawlerState::Inactive;
        info!("Crawler deactivated, motors stopped");
        true
    }

    /// Current telemetry
    pub fn outputs(&self) -> CrawlerOutputs {
        CrawlerOutputs {
            pose: self.main.pose(),
            velocity: Velocity2D {
                vx: self.main.vx(),
                vy: self.main.vy(),
                va: self.main.va(),
            },
            flipper_angle: FlipperAngles {
                front_right: self.front.angle_r(),
                front_left: self.front.angle_l(),
                back_right: self.back.angle_r(),
                back_left: self.back.angle_l(),
            },
            motor_load: MotorLoad {
                right: self.main.load_r(),
                left: self.main.load_l(),
                front_right: self.front.load_r(),
                front_left: self.front.load_l(),
                back_right: self.back.load_r(),
                back_left: self.back.load_l(),
            },
        }
    }

    fn apply_config(&mut self) {
        let c = &self.config;

        self.main.set_config(MainMotorTuning {
            turning_radius: c.turning_radius,
            kp: c.main_motor_kp,
            ki: c.main_motor_ki,
            kd: c.main_motor_kd,
            vx_gain: c.vx_gain,
            va_gain: c.va_gain,
        });

        let main = |direction| MotorConfig {
            direction,
            pulse_number: c.main_motor_pulse,
            radius: c.wheel_radius,
            gear_ratio: c.main_motor_gear_ratio,
            load_gain: c.main_motor_load_gain,
            load_base: c.main_motor_load_base,
        };
        let sub = |direction| MotorConfig {
            direction,
            pulse_number: c.sub_motor_pulse,
            radius: c.pulley_radius,
            gear_ratio: c.sub_motor_gear_ratio,
            load_gain: c.sub_motor_load_gain,
            load_base: c.sub_motor_load_base,
        };

        self.main.set_config_r(main(c.r_main_motor_direction));
        self.main.set_config_l(main(c.l_main_motor_direction));
        self.front.set_config_r(sub(c.r_front_sub_motor_direction));
        self.front.set_config_l(sub(c.l_front_sub_motor_direction));
        self.back.set_config_r(sub(c.r_back_sub_motor_direction));
        self.back.set_config_l(sub(c.l_back_sub_motor_direction));

        let timeout = c.failsafe_timeout();
        self.mode.set_timeout(timeout);
        self.velocity.set_timeout(timeout);
        self.flipper_pwm.set_timeout(timeout);
    }

    fn reset_inputs(&mut self) {
        self.mode.reset();
        self.velocity.reset();
        self.flipper_pwm.reset();
    }

    fn read_inputs(&mut self, now: Instant, inputs: CrawlerInputs) -> (Mode, Velocity2D, FlipperPwm) {
        if let Some(data) = inputs.mode {
            self.mode.push(Mode::from_slice(&data), now);
        }
        if let Some(velocity) = inputs.velocity {
            self.velocity.push(velocity, now);
        }
        if let Some(pwm) = inputs.flipper_pwm {
            self.flipper_pwm.push(pwm, now);
        }
        if self.config.use_orientation3d_in {
            if let Some(sample) = inputs.orientation {
                self.orientation.update(sample);
            }
        }

        let velocity_was_stale = self.velocity.is_stale();
        let pwm_was_stale = self.flipper_pwm.is_stale();

        // Mode keeps its flags, only max speed is dropped
        let mode = self.mode.poll_with(now, |held, _| held.failsafe());
        let velocity = self.velocity.poll(now);
        let flipper_pwm = self.flipper_pwm.poll(now);

        if !velocity_was_stale && self.velocity.is_stale() {
            warn!("Velocity command stale, stopping main tracks");
        }
        if !pwm_was_stale && self.flipper_pwm.is_stale() {
            warn!("Flipper PWM command stale, stopping flippers");
        }

        (mode, velocity, flipper_pwm)
    }

    fn drain_and_close(&mut self) {
        for link in self.links.all_mut() {
            if link.is_open() {
                let _ = link.recv();
            }
            link.close();
        }
    }

    fn save_flipper_angles(&mut self, angles: &FlipperAngles) {
        match self.store.save(angles) {
            Ok(()) => self.save_failed = false,
            Err(e) => {
                if !self.save_failed {
                    warn!("Failed to save flipper angles to {}: {}", self.store.path().display(), e);
                }
                self.save_failed = true;
            }
        }
    }

    fn update_health(&mut self, main_feedback_ok: bool) {
        let health = if !main_feedback_ok {
            RuntimeHealth::FeedbackLost
        } else if self.velocity.is_stale() {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };

        if health != self.health {
            match health {
                RuntimeHealth::Ok => info!("Crawler healthy"),
                RuntimeHealth::CmdStale => warn!("No fresh velocity command"),
                RuntimeHealth::FeedbackLost => warn!("No feedback from main motors"),
            }
        }
        self.health = health;
    }
}

/// Open the link and write one frame; the fault text when either fails
fn open_and_send(link: &mut dyn MotorLink, frame: &str) -> Option<String> {
    if let Err(e) = link.open() {
        return Some(format!("open failed: {}", e));
    }
    link.send(frame).err().map(|e| format!("write error: {}", e))
}

/// Warn when a link starts failing, note when it recovers
fn report_fault(name: &str, failed: &mut bool, fault: Option<String>) {
    let now_failed = fault.is_some();
    match fault {
        Some(fault) if !*failed => warn!("{} {}", name, fault),
        Some(fault) => debug!("{} {}", name, fault),
        None if *failed => info!("{} recovered", name),
        None => {}
    }
    *failed = now_failed;
}
