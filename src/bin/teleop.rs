// Keyboard teleop: W/S drive, A/D turn, 1-4 select flipper, U/J raise/lower,
// R/F speed, C clear pose, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use spider_crawler_runtime::config::{TOPIC_CMD_FLIPPER_PWM, TOPIC_CMD_MODE, TOPIC_CMD_VELOCITY2D};
use spider_crawler_runtime::messages::{FlipperPwm, Velocity2D};
use spider_crawler_runtime::mode::{FlipperStatus, Mode, SpeedLevel};
use std::time::{Duration, Instant};
use tracing::info;

const SPEEDS: [f64; 3] = [0.05, 0.1, 0.15]; // m/s
const TURN_SPEEDS: [f64; 3] = [0.3, 0.6, 1.0]; // rad/s
const FLIPPER_PWM: i32 = 50; // %
const INPUT_TIMEOUT_MS: u64 = 100; // Reset commands after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publishers = Publishers {
        velocity: session.declare_publisher(TOPIC_CMD_VELOCITY2D).await?,
        flipper_pwm: session.declare_publisher(TOPIC_CMD_FLIPPER_PWM).await?,
        mode: session.declare_publisher(TOPIC_CMD_MODE).await?,
    };

    info!("Controls: W/S=drive, A/D=turn, 1-4=select flipper, U/J=flipper up/down, R/F=speed, C=clear pose, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&publishers).await;
    disable_raw_mode()?;

    result
}

struct Publishers<'a> {
    velocity: zenoh::pubsub::Publisher<'a>,
    flipper_pwm: zenoh::pubsub::Publisher<'a>,
    mode: zenoh::pubsub::Publisher<'a>,
}

async fn run_teleop(
    publishers: &Publishers<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mode = Mode::default();

    // Persistent command state
    let mut velocity = Velocity2D::default();
    let mut last_movement_input = Instant::now();
    let mut last_flipper_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let level = mode.speed_level as usize;

                match code {
                    // Drive - update velocity and refresh timestamp
                    KeyCode::Char('w') if pressed => {
                        velocity.vx = SPEEDS[level];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        velocity.vx = -SPEEDS[level];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        velocity.va = TURN_SPEEDS[level];
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        velocity.va = -TURN_SPEEDS[level];
                        last_movement_input = Instant::now();
                    }

                    // Flipper selection toggles
                    KeyCode::Char('1') if pressed => toggle(&mut mode.flipper_select.front_right, "FR"),
                    KeyCode::Char('2') if pressed => toggle(&mut mode.flipper_select.front_left, "FL"),
                    KeyCode::Char('3') if pressed => toggle(&mut mode.flipper_select.back_right, "BR"),
                    KeyCode::Char('4') if pressed => toggle(&mut mode.flipper_select.back_left, "BL"),

                    // Flipper motion
                    KeyCode::Char('u') if pressed => {
                        mode.flipper_status = FlipperStatus::Up;
                        last_flipper_input = Instant::now();
                    }
                    KeyCode::Char('j') if pressed => {
                        mode.flipper_status = FlipperStatus::Down;
                        last_flipper_input = Instant::now();
                    }

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        mode.speed_level = match mode.speed_level {
                            SpeedLevel::Low => SpeedLevel::Mid,
                            _ => SpeedLevel::High,
                        };
                        print_speed(mode.speed_level);
                    }
                    KeyCode::Char('f') if pressed => {
                        mode.speed_level = match mode.speed_level {
                            SpeedLevel::High => SpeedLevel::Mid,
                            _ => SpeedLevel::Low,
                        };
                        print_speed(mode.speed_level);
                    }

                    // Pose clear goes out with the next mode message only
                    KeyCode::Char('c') if pressed => {
                        mode.pose_clear = true;
                        info!("Clearing pose");
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        // Reset commands if no input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            velocity = Velocity2D::default();
        }
        if last_flipper_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            mode.flipper_status = FlipperStatus::Stay;
        }

        // Always publish at ~50Hz
        publishers
            .velocity
            .put(serde_json::to_string(&velocity)?)
            .await?;
        publishers
            .flipper_pwm
            .put(serde_json::to_string(&flipper_pwm(&mode))?)
            .await?;
        publishers
            .mode
            .put(serde_json::to_string(&mode.to_vec())?)
            .await?;
        mode.pose_clear = false;
    }

    Ok(())
}

fn flipper_pwm(mode: &Mode) -> FlipperPwm {
    let pwm = match mode.flipper_status {
        FlipperStatus::Stay => 0,
        FlipperStatus::Up => FLIPPER_PWM,
        FlipperStatus::Down => -FLIPPER_PWM,
    };
    let select = mode.flipper_select;
    let gate = |selected: bool| if selected { pwm } else { 0 };
    FlipperPwm {
        front_right: gate(select.front_right),
        front_left: gate(select.front_left),
        back_right: gate(select.back_right),
        back_left: gate(select.back_left),
    }
}

fn toggle(selected: &mut bool, name: &str) {
    *selected = !*selected;
    info!("Flipper {}: {}", name, if *selected { "selected" } else { "released" });
}

fn print_speed(level: SpeedLevel) {
    let label = match level {
        SpeedLevel::Low => "LOW",
        SpeedLevel::Mid => "MED",
        SpeedLevel::High => "HIGH",
    };
    info!("Speed: {}", label);
}
