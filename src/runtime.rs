// Periodic crawler loop bridged to zenoh
// Inputs are drained once per tick (latest sample wins, pose clear is kept if
// any mode sample asked for it), the crawler runs one cycle, and its state is
// published. Ctrl-C stops the motors before exiting.

use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

use crate::config::{
    CrawlerConfig, TOPIC_CMD_FLIPPER_PWM, TOPIC_CMD_MODE, TOPIC_CMD_ORIENTATION3D,
    TOPIC_CMD_VELOCITY2D, TOPIC_HEALTH, TOPIC_STATE_FLIPPER_ANGLE, TOPIC_STATE_MOTOR_LOAD,
    TOPIC_STATE_POSE3D, TOPIC_STATE_VELOCITY2D,
};
use crate::crawler::{Crawler, CrawlerInputs, CrawlerOutputs, MotorLinks};
use crate::flipper_store::FlipperAngleStore;
use crate::messages::RuntimeHealth;
use crate::mode::merge_mode_samples;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type SampleSubscriber = Subscriber<FifoChannelHandler<Sample>>;

struct Ports<'a> {
    mode: SampleSubscriber,
    velocity: SampleSubscriber,
    flipper_pwm: SampleSubscriber,
    orientation: SampleSubscriber,
    pose: Publisher<'a>,
    state_velocity: Publisher<'a>,
    flipper_angle: Publisher<'a>,
    motor_load: Publisher<'a>,
    health: Publisher<'a>,
}

impl Ports<'_> {
    /// Drain all pending commands (non-blocking), keep latest
    fn read(&self) -> CrawlerInputs {
        CrawlerInputs {
            mode: merge_mode_samples(drain(&self.mode, TOPIC_CMD_MODE)),
            velocity: latest(&self.velocity, TOPIC_CMD_VELOCITY2D),
            flipper_pwm: latest(&self.flipper_pwm, TOPIC_CMD_FLIPPER_PWM),
            orientation: latest(&self.orientation, TOPIC_CMD_ORIENTATION3D),
        }
    }

    /// Publish state and health; a failed put is logged and the cycle goes on
    async fn write(&self, outputs: &CrawlerOutputs, health: RuntimeHealth) {
        let results = [
            (TOPIC_STATE_POSE3D, put_json(&self.pose, &outputs.pose).await),
            (TOPIC_STATE_VELOCITY2D, put_json(&self.state_velocity, &outputs.velocity).await),
            (TOPIC_STATE_FLIPPER_ANGLE, put_json(&self.flipper_angle, &outputs.flipper_angle).await),
            (TOPIC_STATE_MOTOR_LOAD, put_json(&self.motor_load, &outputs.motor_load.as_array()).await),
            (TOPIC_HEALTH, put_json(&self.health, &health).await),
        ];
        for (topic, result) in results {
            if let Err(e) = result {
                warn!("Failed to publish {}: {}", topic, e);
            }
        }
    }
}

/// Drain all pending samples (non-blocking), oldest first
fn drain<T: DeserializeOwned>(subscriber: &SampleSubscriber, topic: &str) -> Vec<T> {
    let mut samples = Vec::new();
    while let Ok(Some(sample)) = subscriber.try_recv() {
        let payload = sample.payload().to_bytes();
        match serde_json::from_slice::<T>(&payload) {
            Ok(value) => samples.push(value),
            Err(e) => warn!("Failed to parse {}: {}", topic, e),
        }
    }
    samples
}

fn latest<T: DeserializeOwned>(subscriber: &SampleSubscriber, topic: &str) -> Option<T> {
    drain(subscriber, topic).pop()
}

async fn put_json<T: Serialize>(publisher: &Publisher<'_>, value: &T) -> Result<(), BoxError> {
    let json = serde_json::to_string(value)?;
    publisher.put(json).await?;
    Ok(())
}

pub async fn run(config: CrawlerConfig, dry_run: bool) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let ports = Ports {
        mode: session.declare_subscriber(TOPIC_CMD_MODE).await?,
        velocity: session.declare_subscriber(TOPIC_CMD_VELOCITY2D).await?,
        flipper_pwm: session.declare_subscriber(TOPIC_CMD_FLIPPER_PWM).await?,
        orientation: session.declare_subscriber(TOPIC_CMD_ORIENTATION3D).await?,
        pose: session.declare_publisher(TOPIC_STATE_POSE3D).await?,
        state_velocity: session.declare_publisher(TOPIC_STATE_VELOCITY2D).await?,
        flipper_angle: session.declare_publisher(TOPIC_STATE_FLIPPER_ANGLE).await?,
        motor_load: session.declare_publisher(TOPIC_STATE_MOTOR_LOAD).await?,
        health: session.declare_publisher(TOPIC_HEALTH).await?,
    };

    let links = if dry_run || !config.motor_enabled {
        info!("Dry run: motor links are simulated, no serial device is opened");
        MotorLinks::mock().0
    } else {
        info!(
            "Motor links: SH1={} SH2={} SH3={}",
            config.sh1_device_name, config.sh2_device_name, config.sh3_device_name
        );
        MotorLinks::serial(&config)
    };

    let period = config.loop_period();
    let mut crawler = Crawler::new(config, links, FlipperAngleStore::in_home());
    crawler.initialize();
    crawler.activate(Instant::now()).await;

    let mut tick = interval(period);
    // A slow cycle (serial timeouts) must not cause a burst of catch-up cycles
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Runtime started: {}Hz loop, {}s failsafe timeout",
        crawler.config().loop_hz,
        crawler.config().failsafe_sec
    );
    info!(
        "Subscribed to: {}, {}, {}, {}",
        TOPIC_CMD_MODE, TOPIC_CMD_VELOCITY2D, TOPIC_CMD_FLIPPER_PWM, TOPIC_CMD_ORIENTATION3D
    );
    info!(
        "Publishing to: {}, {}, {}, {}, {}",
        TOPIC_STATE_POSE3D,
        TOPIC_STATE_VELOCITY2D,
        TOPIC_STATE_FLIPPER_ANGLE,
        TOPIC_STATE_MOTOR_LOAD,
        TOPIC_HEALTH
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Ctrl-C received, stopping motors");
                break;
            }
        }

        // 1. Inputs
        let inputs = ports.read();

        // 2. One control cycle
        let Some(outputs) = crawler.execute(Instant::now(), inputs).await else {
            continue;
        };

        // 3. State and health
        ports.write(&outputs, crawler.health()).await;
    }

    crawler.deactivate().await;
    Ok(())
}
