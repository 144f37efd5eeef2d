// Physics-simulated swerve module
//
// Each motor is a first-order DC motor model driven by voltage and stepped
// once per control period. Closed-loop setpoints run through the same PID +
// feedforward shape as the servo adapter, so outer logic sees comparable
// dynamics with or without hardware.

use std::f64::consts::PI;

use tracing::debug;

use super::channel::{ActuatorChannel, ModuleSensorSnapshot, clamp_volts, is_rest_command};
use crate::config::{ModuleConstants, SUPPLY_VOLTAGE};
use crate::control::{FeedforwardGains, PidController};
use crate::geometry::{Rotation2d, angle_modulus};

/// Electrical and mechanical constants of a brushless DC motor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcMotor {
    pub nominal_voltage: f64,
    pub stall_torque: f64,  // N*m
    pub stall_current: f64, // A
    pub free_current: f64,  // A
    pub free_speed: f64,    // rad/s
    resistance: f64,
    kv: f64, // rad/s per volt
    kt: f64, // N*m per amp
}

impl DcMotor {
    pub fn new(
        nominal_voltage: f64,
        stall_torque: f64,
        stall_current: f64,
        free_current: f64,
        free_speed_rpm: f64,
    ) -> Self {
        let free_speed = free_speed_rpm * 2.0 * PI / 60.0;
        let resistance = nominal_voltage / stall_current;
        Self {
            nominal_voltage,
            stall_torque,
            stall_current,
            free_current,
            free_speed,
            resistance,
            kv: free_speed / (nominal_voltage - resistance * free_current),
            kt: stall_torque / stall_current,
        }
    }

    pub fn kraken_x60() -> Self {
        Self::new(12.0, 7.09, 366.0, 2.0, 6000.0)
    }

    pub fn falcon_500() -> Self {
        Self::new(12.0, 4.69, 257.0, 1.5, 6380.0)
    }

    /// Winding current at a given rotor speed and input voltage.
    pub fn current(&self, rotor_speed: f64, volts: f64) -> f64 {
        (volts - rotor_speed / self.kv) / self.resistance
    }
}

/// A geared DC motor driving an inertial load.
#[derive(Debug, Clone)]
pub struct DcMotorSim {
    motor: DcMotor,
    gearing: f64,
    moi: f64, // kg*m^2
    position: f64, // rad, mechanism side
    velocity: f64, // rad/s, mechanism side
    input_volts: f64,
}

impl DcMotorSim {
    pub fn new(motor: DcMotor, gearing: f64, moi: f64) -> Self {
        Self {
            motor,
            gearing,
            moi,
            position: 0.0,
            velocity: 0.0,
            input_volts: 0.0,
        }
    }

    pub fn set_input_voltage(&mut self, volts: f64) {
        self.input_volts = volts;
    }

    pub fn set_position(&mut self, position: f64) {
        self.position = position;
    }

    /// Advance by `dt` seconds with the input held constant.
    ///
    /// Uses the exact solution of `dw/dt = a*w + b*u`, which stays stable for
    /// any step size.
    pub fn update(&mut self, dt: f64) {
        let m = &self.motor;
        let a = -self.gearing * self.gearing * m.kt / (m.kv * m.resistance * self.moi);
        let b = self.gearing * m.kt / (m.resistance * self.moi);

        let steady = -b * self.input_volts / a;
        let decay = (a * dt).exp();
        let v0 = self.velocity;

        self.velocity = steady + (v0 - steady) * decay;
        self.position += steady * dt + (v0 - steady) * (decay - 1.0) / a;
    }

    /// Advance with the motor disconnected (no back-EMF braking).
    pub fn coast(&mut self, dt: f64) {
        self.position += self.velocity * dt;
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    pub fn current_draw(&self) -> f64 {
        self.motor
            .current(self.velocity * self.gearing, self.input_volts)
            .abs()
    }
}

/// Drive wheel inertia seen by the simulated drive motor.
const DRIVE_MOI: f64 = 0.025;
/// Module azimuth inertia seen by the simulated steering motor.
const TURN_MOI: f64 = 0.004;

/// A simulated module: Kraken X60 drive, Falcon 500 steering.
pub struct SimModuleChannel {
    name: String,
    period: f64,
    wheel_radius: f64,
    drive: DcMotorSim,
    turn: DcMotorSim,
    drive_volts: f64,
    turn_volts: f64,
    drive_pid: PidController,
    drive_ff: FeedforwardGains,
    turn_pid: PidController,
    brake: bool,
}

impl SimModuleChannel {
    pub fn new(constants: &ModuleConstants, period: f64) -> Self {
        Self {
            name: constants.name.clone(),
            period,
            wheel_radius: constants.wheel_radius,
            drive: DcMotorSim::new(
                DcMotor::kraken_x60(),
                constants.drive_gear_ratio,
                DRIVE_MOI,
            ),
            turn: DcMotorSim::new(
                DcMotor::falcon_500(),
                constants.turn_gear_ratio,
                TURN_MOI,
            ),
            drive_volts: 0.0,
            turn_volts: 0.0,
            drive_pid: PidController::new(constants.drive_pid, period),
            drive_ff: constants.drive_ff,
            turn_pid: PidController::new(constants.turn_pid, period)
                .with_continuous_input(-PI, PI),
            brake: true,
        }
    }

    /// Start the module pointing somewhere other than forward.
    pub fn with_initial_angle(mut self, angle: Rotation2d) -> Self {
        self.turn.set_position(angle.radians());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn set_drive_volts(&mut self, volts: f64) {
        self.drive_volts = clamp_volts(volts, SUPPLY_VOLTAGE);
        self.drive.set_input_voltage(self.drive_volts);
    }

    fn set_turn_volts(&mut self, volts: f64) {
        self.turn_volts = clamp_volts(volts, SUPPLY_VOLTAGE);
        self.turn.set_input_voltage(self.turn_volts);
    }

    fn step(motor: &mut DcMotorSim, volts: f64, brake: bool, dt: f64) {
        if !brake && volts == 0.0 {
            motor.coast(dt);
        } else {
            motor.update(dt);
        }
    }
}

impl ActuatorChannel for SimModuleChannel {
    fn refresh(&mut self) -> ModuleSensorSnapshot {
        Self::step(&mut self.drive, self.drive_volts, self.brake, self.period);
        Self::step(&mut self.turn, self.turn_volts, self.brake, self.period);

        ModuleSensorSnapshot {
            drive_position: self.drive.position() * self.wheel_radius,
            drive_velocity: self.drive.velocity() * self.wheel_radius,
            drive_applied_volts: self.drive_volts,
            drive_current: self.drive.current_draw(),
            turn_absolute: Rotation2d::from_radians(angle_modulus(self.turn.position())),
            turn_velocity: self.turn.velocity(),
            turn_applied_volts: self.turn_volts,
            turn_current: self.turn.current_draw(),
            stale: false,
        }
    }

    fn apply_voltage(&mut self, drive_volts: f64, turn_volts: f64) {
        self.set_drive_volts(drive_volts);
        self.set_turn_volts(turn_volts);
    }

    fn apply_drive_voltage(&mut self, volts: f64) {
        self.set_drive_volts(volts);
    }

    fn apply_drive_setpoint(&mut self, velocity: f64, acceleration: f64) {
        let measured = self.drive.velocity() * self.wheel_radius;
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
            .calculate(angle_modulus(self.turn.position()), angle.radians());
        self.set_turn_volts(volts);
    }

    fn set_brake_mode(&mut self, enabled: bool) {
        debug!("{}: brake mode {}", self.name, enabled);
        self.brake = enabled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriveConfig;
    use approx::assert_relative_eq;

    fn channel() -> SimModuleChannel {
        let config = DriveConfig::simulated();
        SimModuleChannel::new(&config.modules[0], config.loop_period())
    }

    #[test]
    fn test_motor_reaches_free_speed_at_nominal_voltage() {
        let motor = DcMotor::kraken_x60();
        let mut sim = DcMotorSim::new(motor, 1.0, 0.001);
        sim.set_input_voltage(12.0);
        for _ in 0..500 {
            sim.update(0.02);
        }
        // Free speed minus the free-current drop
        assert_relative_eq!(sim.velocity(), motor.free_speed, max_relative = 0.01);
        assert!(sim.current_draw() < 5.0);
    }

    #[test]
    fn test_exact_step_matches_many_small_steps() {
        let mut coarse = DcMotorSim::new(DcMotor::falcon_500(), 21.4, 0.004);
        let mut fine = coarse.clone();
        coarse.set_input_voltage(6.0);
        fine.set_input_voltage(6.0);
        coarse.update(0.02);
        for _ in 0..20 {
            fine.update(0.001);
        }
        assert_relative_eq!(coarse.velocity(), fine.velocity(), epsilon = 1e-9);
        assert_relative_eq!(coarse.position(), fine.position(), epsilon = 1e-9);
    }

    #[test]
    fn test_drive_tracks_velocity_setpoint() {
        let mut sim = channel();
        let mut snapshot = sim.refresh();
        for _ in 0..100 {
            sim.apply_drive_setpoint(2.0, 0.0);
            snapshot = sim.refresh();
        }
        assert_relative_eq!(snapshot.drive_velocity, 2.0, epsilon = 0.05);
        assert!(snapshot.drive_position > 0.0);
    }

    #[test]
    fn test_turn_converges_across_wrap() {
        let mut sim = channel().with_initial_angle(Rotation2d::from_degrees(170.0));
        let target = Rotation2d::from_degrees(-170.0);
        let mut snapshot = sim.refresh();
        for _ in 0..50 {
            sim.apply_turn_setpoint(target);
            snapshot = sim.refresh();
        }
        let error = (snapshot.turn_absolute - target).radians();
        assert!(error.abs() < 0.01, "turn error {}", error);
    }

    #[test]
    fn test_rest_setpoint_is_zero_volts() {
        let mut sim = channel();
        sim.refresh();
        sim.apply_drive_setpoint(0.0, 0.0);
        let snapshot = sim.refresh();
        assert_eq!(snapshot.drive_applied_volts, 0.0);
    }

    #[test]
    fn test_zero_setpoint_while_moving_still_brakes_with_pid() {
        let mut sim = channel();
        for _ in 0..50 {
            sim.apply_drive_setpoint(2.0, 0.0);
            sim.refresh();
        }
        sim.apply_drive_setpoint(0.0, 0.0);
        let snapshot = sim.refresh();
        assert!(snapshot.drive_applied_volts < 0.0);
    }

    #[test]
    fn test_voltage_is_clamped() {
        let mut sim = channel();
        sim.apply_voltage(20.0, -20.0);
        let snapshot = sim.refresh();
        assert_eq!(snapshot.drive_applied_volts, SUPPLY_VOLTAGE);
        assert_eq!(snapshot.turn_applied_volts, -SUPPLY_VOLTAGE);
    }

    #[test]
    fn test_coast_keeps_rolling() {
        let mut sim = channel();
        for _ in 0..50 {
            sim.apply_drive_setpoint(1.0, 0.0);
            sim.refresh();
        }
        sim.set_brake_mode(false);
        sim.apply_voltage(0.0, 0.0);
        let before = sim.refresh().drive_velocity;
        let after = sim.refresh().drive_velocity;
        assert_relative_eq!(before, after, epsilon = 1e-12);
    }
}
