// Physical swerve module: two Feetech STS3215 servos on a shared serial bus
//
// Both servos run open-loop (PWM mode); the host closes the drive velocity
// and steering angle loops with the same PID + feedforward code the simulator
// uses. The steering servo is directly coupled, so its 12-bit encoder reads
// the module angle directly. The drive encoder is unwrapped into a
// cumulative wheel distance.

use std::f64::consts::{PI, TAU};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use super::channel::{ActuatorChannel, ModuleSensorSnapshot, clamp_volts, is_rest_command};
use super::feetech::{
    FeetechBus, FeetechError, OperatingMode, PWM_FULL_SCALE, STEPS_PER_REVOLUTION,
};
use crate::config::{ModuleConstants, SUPPLY_VOLTAGE};
use crate::control::{FeedforwardGains, PidController};
use crate::geometry::{Rotation2d, angle_modulus};
use crate::sampling::SignalSource;

/// Servo bus shared by every module and the odometry sampler.
pub type SharedBus = Arc<Mutex<FeetechBus>>;

pub fn shared_bus(bus: FeetechBus) -> SharedBus {
    Arc::new(Mutex::new(bus))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Tracks whole revolutions of a single-turn 12-bit encoder.
#[derive(Debug, Clone, Default)]
pub struct EncoderUnwrapper {
    last: Option<u16>,
    turns: i64,
}

impl EncoderUnwrapper {
    /// Cumulative steps for a new raw reading. Assumes less than half a
    /// revolution between consecutive readings.
    pub fn update(&mut self, raw: u16) -> f64 {
        let half = (STEPS_PER_REVOLUTION / 2.0) as i32;
        if let Some(last) = self.last {
            let delta = raw as i32 - last as i32;
            if delta > half {
                self.turns -= 1;
            } else if delta < -half {
                self.turns += 1;
            }
        }
        self.last = Some(raw);
        self.turns as f64 * STEPS_PER_REVOLUTION + raw as f64
    }
}

/// Unit conversions for one module's servos.
#[derive(Debug, Clone, Copy)]
struct Calibration {
    drive_gear_ratio: f64,
    wheel_radius: f64,
    turn_zero_offset: f64,
}

impl Calibration {
    fn drive_meters(&self, steps: f64) -> f64 {
        steps / STEPS_PER_REVOLUTION * TAU / self.drive_gear_ratio * self.wheel_radius
    }

    fn turn_angle(&self, raw: u16) -> Rotation2d {
        let radians = raw as f64 / STEPS_PER_REVOLUTION * TAU - self.turn_zero_offset;
        Rotation2d::from_radians(angle_modulus(radians))
    }

    fn turn_rate(&self, steps_per_sec: f64) -> f64 {
        steps_per_sec / STEPS_PER_REVOLUTION * TAU
    }
}

fn volts_to_duty(volts: f64) -> i16 {
    let duty = clamp_volts(volts, SUPPLY_VOLTAGE) / SUPPLY_VOLTAGE * PWM_FULL_SCALE as f64;
    duty.round() as i16
}

/// A swerve module driven by a drive servo and a steering servo.
pub struct FeetechModuleChannel {
    name: String,
    bus: SharedBus,
    drive_id: u8,
    turn_id: u8,
    calibration: Calibration,
    drive_pid: PidController,
    drive_ff: FeedforwardGains,
    turn_pid: PidController,
    /// Shared with the sampler's drive source; only updated while the bus
    /// lock is held, so every reading is seen in bus order.
    drive_unwrap: Arc<Mutex<EncoderUnwrapper>>,
    drive_duty: i16,
    turn_duty: i16,
    last: ModuleSensorSnapshot,
}

impl FeetechModuleChannel {
    /// Configure both servos for open-loop output and enable torque.
    ///
    /// Fails if either servo does not answer; a module with a missing
    /// servo must not start.
    pub fn new(
        constants: &ModuleConstants,
        bus: SharedBus,
        period: f64,
    ) -> Result<Self, FeetechError> {
        info!(
            "Initializing module {} (drive {}, turn {})",
            constants.name, constants.drive_id, constants.turn_id
        );
        {
            let mut guard = lock(&bus);
            for id in [constants.drive_id, constants.turn_id] {
                if !guard.ping(id)? {
                    warn!("Servo {} not responding to ping", id);
                    return Err(FeetechError::Timeout { id });
                }
                // Torque must be off to change operating mode
                guard.disable_torque(id)?;
                guard.set_operating_mode(id, OperatingMode::Pwm)?;
                guard.set_pwm(id, 0)?;
                guard.enable_torque(id)?;
            }
        }

        Ok(Self {
            name: constants.name.clone(),
            bus,
            drive_id: constants.drive_id,
            turn_id: constants.turn_id,
            calibration: Calibration {
                drive_gear_ratio: constants.drive_gear_ratio,
                wheel_radius: constants.wheel_radius,
                turn_zero_offset: constants.turn_zero_offset,
            },
            drive_pid: PidController::new(constants.drive_pid, period),
            drive_ff: constants.drive_ff,
            turn_pid: PidController::new(constants.turn_pid, period)
                .with_continuous_input(-PI, PI),
            drive_unwrap: Arc::new(Mutex::new(EncoderUnwrapper::default())),
            drive_duty: 0,
            turn_duty: 0,
            last: ModuleSensorSnapshot::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive distance (m) and steering angle (rad) sources for the odometry
    /// sampler. The drive source counts revolutions together with `refresh`,
    /// so both report the same cumulative distance.
    pub fn odometry_sources(&self) -> (Box<dyn SignalSource>, Box<dyn SignalSource>) {
        let calibration = self.calibration;

        let drive = {
            let bus = Arc::clone(&self.bus);
            let id = self.drive_id;
            let unwrap = Arc::clone(&self.drive_unwrap);
            move || {
                let mut bus = lock(&bus);
                let raw = bus.get_position(id).ok()?;
                let steps = lock(&unwrap).update(raw);
                Some(calibration.drive_meters(steps))
            }
        };

        let turn = {
            let bus = Arc::clone(&self.bus);
            let id = self.turn_id;
            move || {
                let raw = lock(&bus).get_position(id).ok()?;
                Some(calibration.turn_angle(raw).radians())
            }
        };

        (Box::new(drive), Box::new(turn))
    }

    fn write_duty(&mut self, id: u8, duty: i16) {
        if let Err(e) = lock(&self.bus).set_pwm(id, duty) {
            warn!("{}: failed to command servo {}: {}", self.name, id, e);
        }
    }

    fn set_drive_volts(&mut self, volts: f64) {
        self.drive_duty = volts_to_duty(volts);
        self.write_duty(self.drive_id, self.drive_duty);
    }

    fn set_turn_volts(&mut self, volts: f64) {
        self.turn_duty = volts_to_duty(volts);
        self.write_duty(self.turn_id, self.turn_duty);
    }
}

impl ActuatorChannel for FeetechModuleChannel {
    fn refresh(&mut self) -> ModuleSensorSnapshot {
        let result = {
            let mut bus = lock(&self.bus);
            bus.read_status(self.drive_id).and_then(|drive| {
                let steps = lock(&self.drive_unwrap).update(drive.position);
                bus.read_status(self.turn_id).map(|turn| (drive, steps, turn))
            })
        };

        match result {
            Ok((drive, steps, turn)) => {
                let c = self.calibration;
                let duty_fraction = |duty: i16| duty as f64 / PWM_FULL_SCALE as f64;
                self.last = ModuleSensorSnapshot {
                    drive_position: c.drive_meters(steps),
                    drive_velocity: c.drive_meters(drive.velocity as f64),
                    drive_applied_volts: duty_fraction(self.drive_duty) * drive.supply_volts(),
                    drive_current: drive.current_amps().abs(),
                    turn_absolute: c.turn_angle(turn.position),
                    turn_velocity: c.turn_rate(turn.velocity as f64),
                    turn_applied_volts: duty_fraction(self.turn_duty) * turn.supply_volts(),
                    turn_current: turn.current_amps().abs(),
                    stale: false,
                };
            }
            Err(e) => {
                if !self.last.stale {
                    warn!("{}: sensor read failed, reusing last values: {}", self.name, e);
                }
                self.last.stale = true;
            }
        }
        self.last
    }

    fn apply_voltage(&mut self, drive_volts: f64, turn_volts: f64) {
        self.set_drive_volts(drive_volts);
        self.set_turn_volts(turn_volts);
    }

    fn apply_drive_voltage(&mut self, volts: f64) {
        self.set_drive_volts(volts);
    }

    fn apply_drive_setpoint(&mut self, velocity: f64, acceleration: f64) {
        let measured = self.last.drive_velocity;
        if is_rest_command(velocity, acceleration, measured) {
            self.drive_pid.reset();
            self.set_drive_volts(0.0);
            return;
        }
        let volts = self.drive_pid.calculate(measured, velocity)
            + self.drive_ff.calculate(velocity, acceleration);
        self.set_drive_volts(volts);
    }

    fn apply_turn_setpoint(&mut self, angle: Rotation2d) {
        let volts = self
            .turn_pid
            .calculate(self.last.turn_absolute.radians(), angle.radians());
        self.set_turn_volts(volts);
    }

    fn set_brake_mode(&mut self, enabled: bool) {
        // With torque off the servos spin freely
        let mut bus = lock(&self.bus);
        for id in [self.drive_id, self.turn_id] {
            let result = if enabled {
                bus.enable_torque(id)
            } else {
                bus.disable_torque(id)
            };
            if let Err(e) = result {
                warn!("{}: failed to set brake mode on servo {}: {}", self.name, id, e);
            }
        }
    }
}

impl Drop for FeetechModuleChannel {
    fn drop(&mut self) {
        // Try to stop servos when the channel is dropped (safety measure)
        self.apply_voltage(0.0, 0.0);
    }
}
