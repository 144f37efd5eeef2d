// Fixed-rate drive loop with command watchdog
//
// Plays the part of the robot's scheduler: once per tick it updates the
// drivetrain, turns the latest drive command into a velocity request, and
// publishes pose, module and health telemetry over zenoh.
// If commands stop arriving (teleop crashed, link dropped) the watchdog
// stops the robot instead of replaying the last command forever.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CMD_TIMEOUT, DriveConfig, TOPIC_CMD_DRIVE, TOPIC_HEALTH, TOPIC_MODULES, TOPIC_POSE,
};
use crate::drive::{Drivetrain, HeadingLock, MODULE_COUNT, OdometryFeed, SignalLayout};
use crate::geometry::Translation2d;
use crate::messages::{DriveCommand, ModuleMessage, PoseMessage, RuntimeHealth};
use crate::motor::{ActuatorChannel, FeetechBus, FeetechModuleChannel, shared_bus};
use crate::sampling::SamplerBuilder;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How to start the runtime.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// JSON drive configuration; a built-in preset is used when absent.
    pub config: Option<PathBuf>,
    /// Drive simulated modules instead of servos.
    pub sim: bool,
    /// Serial port of the servo bus.
    pub port: String,
}

pub struct Runtime {
    latest_cmd: Option<DriveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    heading_lock: HeadingLock,
    aiming: bool,
}

impl Runtime {
    pub fn new(config: &DriveConfig) -> Self {
        Self {
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            heading_lock: HeadingLock::new(&config.heading_lock, config.loop_period()),
            aiming: false,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: DriveCommand) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = Instant::now();
    }

    /// Run one control tick: update odometry, then command the modules
    /// according to the watchdog state.
    pub fn step(&mut self, drivetrain: &mut Drivetrain) -> RuntimeHealth {
        drivetrain.periodic();

        let cmd_age = self.cmd_received_at.elapsed();
        let fresh = self.latest_cmd.clone().filter(|_| cmd_age <= CMD_TIMEOUT);
        let mut health = match fresh {
            Some(cmd) => {
                let mut speeds = cmd.speeds();
                match cmd.aim_at {
                    Some([x, y]) => {
                        if !self.aiming {
                            self.heading_lock.reset();
                            self.aiming = true;
                        }
                        speeds.omega = self.heading_lock.omega(
                            &drivetrain.pose(),
                            Translation2d::new(x, y),
                            drivetrain.max_angular_speed(),
                        );
                    }
                    None => self.aiming = false,
                }
                drivetrain.run_velocity(speeds);
                RuntimeHealth::Ok
            }
            None => {
                // Watchdog triggered (or no command yet) - stop the robot
                if self.health == RuntimeHealth::Ok {
                    warn!("Command stale ({:?} old), stopping robot", cmd_age);
                }
                self.aiming = false;
                drivetrain.stop();
                RuntimeHealth::CmdStale
            }
        };

        if drivetrain.any_stale() {
            health = RuntimeHealth::SensorStale;
        }
        if health != self.health {
            info!("Health: {:?} -> {:?}", self.health, health);
        }
        self.health = health;
        health
    }
}

/// Per-module telemetry for the current tick.
pub fn module_messages(drivetrain: &Drivetrain) -> Vec<ModuleMessage> {
    let names = drivetrain.module_names();
    let setpoints = drivetrain.setpoints();
    let snapshots = drivetrain.snapshots();
    (0..MODULE_COUNT)
        .map(|i| {
            let setpoint = setpoints[i]
                .map(|s| (s.speed, s.angle.radians()))
                .unwrap_or((0.0, snapshots[i].turn_absolute.radians()));
            ModuleMessage::new(names[i], setpoint, &snapshots[i])
        })
        .collect()
}

/// Open the servo bus, bring up all four modules and start the odometry
/// sampler on the same bus.
pub fn build_hardware(config: &DriveConfig, port: &str) -> Result<Drivetrain, BoxError> {
    config.validate_for_hardware()?;

    info!("Opening servo bus on {}", port);
    let bus = shared_bus(FeetechBus::open(port)?);
    let period = config.loop_period();

    let mut builder = SamplerBuilder::new(config.odometry_hz, config.queue_capacity);
    let mut channels: Vec<Box<dyn ActuatorChannel>> = Vec::with_capacity(MODULE_COUNT);
    let mut signals = Vec::with_capacity(MODULE_COUNT);
    for constants in &config.modules {
        let channel = FeetechModuleChannel::new(constants, bus.clone(), period)?;
        let (drive, turn) = channel.odometry_sources();
        signals.push((builder.register(drive), builder.register(turn)));
        channels.push(Box::new(channel));
    }

    let channels: [Box<dyn ActuatorChannel>; MODULE_COUNT] = channels
        .try_into()
        .map_err(|_| "expected one channel per module")?;
    let layout = SignalLayout {
        modules: signals
            .try_into()
            .map_err(|_| "expected one signal pair per module")?,
        gyro: None,
    };
    let feed = OdometryFeed::new(builder.spawn()?, layout);

    Ok(Drivetrain::new(config, channels, Some(feed))?)
}

pub async fn run(options: RunOptions) -> Result<(), BoxError> {
    let config = match &options.config {
        Some(path) => DriveConfig::load(path)?,
        None if options.sim => DriveConfig::simulated(),
        None => DriveConfig::feetech(),
    };

    let mut drivetrain = if options.sim {
        info!("Using simulated modules");
        Drivetrain::simulated(&config)?
    } else {
        build_hardware(&config, &options.port)?
    };

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD_DRIVE).await?;
    let pub_pose = session.declare_publisher(TOPIC_POSE).await?;
    let pub_modules = session.declare_publisher(TOPIC_MODULES).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;

    let mut runtime = Runtime::new(&config);
    let mut tick = interval(Duration::from_secs_f64(config.loop_period()));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        config.loop_hz,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD_DRIVE);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_POSE, TOPIC_MODULES, TOPIC_HEALTH
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }

        // 1. Drain all pending commands (non-blocking), keep latest
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DriveCommand>(&payload) {
                Ok(cmd) => runtime.on_command(cmd),
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Odometry + actuation (includes watchdog logic)
        let health = runtime.step(&mut drivetrain);

        // 3. Publish state
        let pose = PoseMessage::from(&drivetrain.pose());
        pub_pose.put(serde_json::to_string(&pose)?).await?;
        pub_modules
            .put(serde_json::to_string(&module_messages(&drivetrain))?)
            .await?;
        pub_health.put(serde_json::to_string(&health)?).await?;
    }

    drivetrain.idle();
    Ok(())
}
