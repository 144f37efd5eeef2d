// One swerve module: turns desired (speed, angle) into channel setpoints

use crate::geometry::Rotation2d;
use crate::motor::{ActuatorChannel, ModuleSensorSnapshot};

use super::kinematics::{ModulePosition, ModuleState};

pub struct Module {
    name: String,
    channel: Box<dyn ActuatorChannel>,
    snapshot: ModuleSensorSnapshot,
    /// Last state sent to the channel, after optimization and scaling.
    setpoint: Option<ModuleState>,
}

impl Module {
    pub fn new(name: impl Into<String>, channel: Box<dyn ActuatorChannel>) -> Self {
        Self {
            name: name.into(),
            channel,
            snapshot: ModuleSensorSnapshot::default(),
            setpoint: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the channel once for this control cycle.
    pub fn refresh(&mut self) -> &ModuleSensorSnapshot {
        self.snapshot = self.channel.refresh();
        &self.snapshot
    }

    /// Drive toward `desired`, taking the short way round and holding the
    /// wheel speed back while the steering catches up.
    ///
    /// Returns the state actually commanded.
    pub fn run_setpoint(&mut self, desired: ModuleState, acceleration: f64) -> ModuleState {
        let current = self.snapshot.turn_absolute;
        let (optimized, flipped) = desired.optimize(current);
        let commanded = optimized.cosine_scaled(current);
        // A flipped wheel accelerates in the opposite direction too
        let acceleration = if flipped { -acceleration } else { acceleration };

        self.channel.apply_turn_setpoint(commanded.angle);
        self.channel
            .apply_drive_setpoint(commanded.speed, acceleration);
        self.setpoint = Some(commanded);
        commanded
    }

    /// Open-loop drive voltage with the wheel held straight, for
    /// feedforward characterization.
    pub fn run_characterization(&mut self, volts: f64) {
        self.channel.apply_turn_setpoint(Rotation2d::ZERO);
        self.channel.apply_drive_voltage(volts);
        self.setpoint = None;
    }

    /// Zero output on both motors.
    pub fn stop(&mut self) {
        self.channel.apply_voltage(0.0, 0.0);
        self.setpoint = None;
    }

    pub fn set_brake_mode(&mut self, enabled: bool) {
        self.channel.set_brake_mode(enabled);
    }

    pub fn setpoint(&self) -> Option<ModuleState> {
        self.setpoint
    }

    pub fn snapshot(&self) -> &ModuleSensorSnapshot {
        &self.snapshot
    }

    /// Measured speed and angle.
    pub fn state(&self) -> ModuleState {
        ModuleState::new(self.snapshot.drive_velocity, self.snapshot.turn_absolute)
    }

    /// Measured cumulative distance and angle.
    pub fn position(&self) -> ModulePosition {
        ModulePosition::new(self.snapshot.drive_position, self.snapshot.turn_absolute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriveConfig;
    use crate::motor::SimModuleChannel;
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Voltage(f64, f64),
        DriveVoltage(f64),
        Drive(f64, f64),
        Turn(f64),
    }

    /// Channel that records commands and reports a fixed steering angle.
    struct RecordingChannel {
        angle: Rotation2d,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl ActuatorChannel for RecordingChannel {
        fn refresh(&mut self) -> ModuleSensorSnapshot {
            ModuleSensorSnapshot {
                turn_absolute: self.angle,
                ..Default::default()
            }
        }

        fn apply_voltage(&mut self, drive_volts: f64, turn_volts: f64) {
            self.calls.lock().unwrap().push(Call::Voltage(drive_volts, turn_volts));
        }

        fn apply_drive_voltage(&mut self, volts: f64) {
            self.calls.lock().unwrap().push(Call::DriveVoltage(volts));
        }

        fn apply_drive_setpoint(&mut self, velocity: f64, acceleration: f64) {
            self.calls.lock().unwrap().push(Call::Drive(velocity, acceleration));
        }

        fn apply_turn_setpoint(&mut self, angle: Rotation2d) {
            self.calls.lock().unwrap().push(Call::Turn(angle.degrees()));
        }

        fn set_brake_mode(&mut self, _enabled: bool) {}
    }

    fn module_at(degrees: f64) -> (Module, Arc<Mutex<Vec<Call>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let channel = RecordingChannel {
            angle: Rotation2d::from_degrees(degrees),
            calls: Arc::clone(&calls),
        };
        let mut module = Module::new("test", Box::new(channel));
        module.refresh();
        (module, calls)
    }

    #[test]
    fn test_large_turn_is_flipped() {
        let (mut module, calls) = module_at(0.0);
        let commanded =
            module.run_setpoint(ModuleState::new(1.0, Rotation2d::from_degrees(170.0)), 0.5);

        assert_relative_eq!(commanded.angle.degrees(), -10.0, epsilon = 1e-9);
        assert!(commanded.speed < 0.0);
        assert_relative_eq!(
            commanded.speed,
            -(10.0f64.to_radians().cos()),
            epsilon = 1e-9
        );

        let calls = calls.lock().unwrap();
        assert!(matches!(calls[0], Call::Turn(deg) if (deg + 10.0).abs() < 1e-9));
        assert!(matches!(calls[1], Call::Drive(v, a) if v < 0.0 && a == -0.5));
    }

    #[test]
    fn test_perpendicular_wheel_does_not_drive() {
        let (mut module, calls) = module_at(0.0);
        module.run_setpoint(ModuleState::new(2.0, Rotation2d::from_degrees(90.0)), 0.0);
        assert_eq!(calls.lock().unwrap()[1], Call::Drive(0.0, 0.0));
    }

    #[test]
    fn test_aligned_wheel_drives_unscaled() {
        let (mut module, calls) = module_at(45.0);
        let commanded =
            module.run_setpoint(ModuleState::new(2.0, Rotation2d::from_degrees(45.0)), 1.0);
        assert_relative_eq!(commanded.speed, 2.0, epsilon = 1e-12);
        assert!(matches!(calls.lock().unwrap()[1], Call::Drive(_, a) if a == 1.0));
        assert_eq!(module.setpoint(), Some(commanded));
    }

    #[test]
    fn test_stop_clears_setpoint() {
        let (mut module, calls) = module_at(0.0);
        module.run_setpoint(ModuleState::new(1.0, Rotation2d::ZERO), 0.0);
        module.stop();
        assert_eq!(module.setpoint(), None);
        assert_eq!(calls.lock().unwrap().last(), Some(&Call::Voltage(0.0, 0.0)));
    }

    #[test]
    fn test_flip_from_rest_reverses_acceleration() {
        let (mut module, calls) = module_at(0.0);
        module.run_setpoint(ModuleState::new(0.0, Rotation2d::from_degrees(170.0)), 1.0);
        let calls = calls.lock().unwrap();
        assert!(matches!(calls[1], Call::Drive(v, a) if v == 0.0 && a == -1.0));
    }

    #[test]
    fn test_characterization_only_drives_open_loop() {
        let (mut module, calls) = module_at(30.0);
        module.run_characterization(3.0);
        let calls = calls.lock().unwrap();
        assert_eq!(*calls, vec![Call::Turn(0.0), Call::DriveVoltage(3.0)]);
    }

    #[test]
    fn test_characterization_holds_wheel_straight() {
        let config = DriveConfig::simulated();
        let channel = SimModuleChannel::new(&config.modules[0], config.loop_period())
            .with_initial_angle(Rotation2d::from_degrees(60.0));
        let mut module = Module::new("sim", Box::new(channel));

        for _ in 0..100 {
            module.refresh();
            module.run_characterization(2.0);
        }
        let snapshot = *module.refresh();
        assert!(
            snapshot.turn_absolute.degrees().abs() < 1.0,
            "steering at {} deg",
            snapshot.turn_absolute.degrees()
        );
        assert_eq!(snapshot.drive_applied_volts, 2.0);
        assert!(snapshot.drive_velocity > 0.0);
        assert_eq!(module.setpoint(), None);
    }
}
