// Drivetrain supervisor: four modules, kinematics and the pose estimate
//
// Driven from outside once per control tick: `periodic()` refreshes the
// modules and folds new odometry into the pose, then a velocity command is
// turned into module setpoints. There is no internal timer.

use tracing::{debug, info};

use crate::config::{ConfigError, DriveConfig};
use crate::geometry::{Pose2d, Rotation2d};
use crate::motor::{ActuatorChannel, ModuleSensorSnapshot, SimModuleChannel};

use super::kinematics::{ChassisSpeeds, MODULE_COUNT, ModulePosition, ModuleState, SwerveKinematics};
use super::module::Module;
use super::odometry::{OdometryFeed, OdometrySample, SwerveOdometry};

pub struct Drivetrain {
    modules: [Module; MODULE_COUNT],
    kinematics: SwerveKinematics,
    odometry: SwerveOdometry,
    feed: Option<OdometryFeed>,
    period: f64,
    max_linear_speed: f64,
    max_angular_speed: f64,
    ticks: u64,
    last_gyro: Option<Rotation2d>,
}

impl Drivetrain {
    /// Build a drivetrain over four channels, in config module order.
    ///
    /// Without a `feed`, odometry integrates one sample per tick taken from
    /// the module snapshots.
    pub fn new(
        config: &DriveConfig,
        channels: [Box<dyn ActuatorChannel>; MODULE_COUNT],
        feed: Option<OdometryFeed>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let kinematics = SwerveKinematics::new(config.modules.each_ref().map(|m| m.location()))?;

        let [fl, fr, bl, br] = channels;
        let [fl_name, fr_name, bl_name, br_name] =
            config.modules.each_ref().map(|m| m.name.clone());
        let mut modules = [
            Module::new(fl_name, fl),
            Module::new(fr_name, fr),
            Module::new(bl_name, bl),
            Module::new(br_name, br),
        ];
        for module in modules.iter_mut() {
            module.refresh();
        }
        let positions = modules.each_ref().map(|m| m.position());
        let odometry = SwerveOdometry::new(kinematics.clone(), positions, Pose2d::default());

        info!(
            "Drivetrain ready: max {:.2} m/s, {:.2} rad/s, odometry from {}",
            config.max_linear_speed,
            config.max_angular_speed(),
            if feed.is_some() { "sampler" } else { "control loop" }
        );

        Ok(Self {
            modules,
            kinematics,
            odometry,
            feed,
            period: config.loop_period(),
            max_linear_speed: config.max_linear_speed,
            max_angular_speed: config.max_angular_speed(),
            ticks: 0,
            last_gyro: None,
        })
    }

    /// Drivetrain on simulated modules.
    pub fn simulated(config: &DriveConfig) -> Result<Self, ConfigError> {
        let period = config.loop_period();
        let channels = config.modules.each_ref().map(|constants| {
            Box::new(SimModuleChannel::new(constants, period)) as Box<dyn ActuatorChannel>
        });
        Self::new(config, channels, None)
    }

    /// Refresh module sensors and integrate every odometry sample taken
    /// since the previous tick.
    pub fn periodic(&mut self) {
        for module in self.modules.iter_mut() {
            module.refresh();
        }

        let samples = match &self.feed {
            Some(feed) => feed.drain(),
            None => vec![OdometrySample {
                timestamp: self.ticks as f64 * self.period,
                module_positions: self.module_positions(),
                gyro_heading: None,
            }],
        };
        self.ticks += 1;

        if samples.len() > 1 {
            debug!("Replaying {} odometry samples", samples.len());
        }
        for sample in &samples {
            if self.odometry.update(sample) {
                if let Some(gyro) = sample.gyro_heading {
                    self.last_gyro = Some(gyro);
                }
            }
        }
    }

    /// Drive at `speeds`, robot- or field-relative.
    pub fn run_velocity(&mut self, speeds: ChassisSpeeds) -> [ModuleState; MODULE_COUNT] {
        let speeds = speeds
            .to_robot_relative(self.heading())
            .discretize(self.period);
        let mut states = self.kinematics.to_module_states(speeds);
        SwerveKinematics::desaturate(&mut states, self.max_linear_speed);
        self.run_setpoints(states, [0.0; MODULE_COUNT])
    }

    /// Send precomputed module states. Returns what each module actually
    /// commanded after optimization.
    pub fn run_setpoints(
        &mut self,
        states: [ModuleState; MODULE_COUNT],
        accelerations: [f64; MODULE_COUNT],
    ) -> [ModuleState; MODULE_COUNT] {
        let mut commanded = [ModuleState::default(); MODULE_COUNT];
        for (i, module) in self.modules.iter_mut().enumerate() {
            commanded[i] = module.run_setpoint(states[i], accelerations[i]);
        }
        commanded
    }

    /// Open-loop drive voltage on every module, wheels straight.
    pub fn run_characterization(&mut self, volts: f64) {
        for module in self.modules.iter_mut() {
            module.run_characterization(volts);
        }
    }

    /// Command zero velocity; modules hold their current angle.
    pub fn stop(&mut self) {
        self.run_velocity(ChassisSpeeds::default());
    }

    /// Zero output on every motor, for shutdown. Unlike `stop` there is no
    /// closed loop left running afterwards.
    pub fn idle(&mut self) {
        for module in self.modules.iter_mut() {
            module.stop();
        }
    }

    /// Stop with the wheels turned into an X so the robot resists pushing.
    pub fn stop_with_x(&mut self) {
        let locations = *self.kinematics.locations();
        let angles = locations.map(|location| location.angle());
        self.kinematics.reset_headings(angles);
        self.stop();
    }

    pub fn set_brake_mode(&mut self, enabled: bool) {
        for module in self.modules.iter_mut() {
            module.set_brake_mode(enabled);
        }
    }

    pub fn pose(&self) -> Pose2d {
        self.odometry.pose()
    }

    pub fn heading(&self) -> Rotation2d {
        self.odometry.pose().rotation
    }

    /// Move the pose estimate; motion before this call is forgotten.
    pub fn reset_pose(&mut self, pose: Pose2d) {
        let positions = self.module_positions();
        self.odometry.reset(pose, positions, self.last_gyro);
        info!(
            "Pose reset to ({:.3}, {:.3}, {:.1} deg)",
            pose.x(),
            pose.y(),
            pose.rotation.degrees()
        );
    }

    pub fn module_names(&self) -> [&str; MODULE_COUNT] {
        self.modules.each_ref().map(|m| m.name())
    }

    /// Measured speed and angle of each module.
    pub fn module_states(&self) -> [ModuleState; MODULE_COUNT] {
        self.modules.each_ref().map(|m| m.state())
    }

    pub fn module_positions(&self) -> [ModulePosition; MODULE_COUNT] {
        self.modules.each_ref().map(|m| m.position())
    }

    /// Last state commanded to each module, if it is being driven closed-loop.
    pub fn setpoints(&self) -> [Option<ModuleState>; MODULE_COUNT] {
        self.modules.each_ref().map(|m| m.setpoint())
    }

    pub fn snapshots(&self) -> [ModuleSensorSnapshot; MODULE_COUNT] {
        self.modules.each_ref().map(|m| *m.snapshot())
    }

    /// True if any module is reporting carried-over sensor values.
    pub fn any_stale(&self) -> bool {
        self.modules.iter().any(|m| m.snapshot().stale)
    }

    /// Robot-relative velocity from the measured module states.
    pub fn measured_speeds(&self) -> ChassisSpeeds {
        self.kinematics.to_chassis_speeds(&self.module_states())
    }

    pub fn max_linear_speed(&self) -> f64 {
        self.max_linear_speed
    }

    pub fn max_angular_speed(&self) -> f64 {
        self.max_angular_speed
    }
}
