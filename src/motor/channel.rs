// Hardware-independent actuation interface for one swerve module
//
// Implemented by the Feetech servo adapter and by the physics simulator, so
// the module controller and drivetrain never know which one they drive.

use crate::geometry::Rotation2d;

/// Measured state of one module, refreshed once per control cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModuleSensorSnapshot {
    pub drive_position: f64, // m, cumulative
    pub drive_velocity: f64, // m/s
    pub drive_applied_volts: f64,
    pub drive_current: f64, // A
    pub turn_absolute: Rotation2d,
    pub turn_velocity: f64, // rad/s
    pub turn_applied_volts: f64,
    pub turn_current: f64, // A
    /// Set when the latest read failed and the values above are carried over.
    pub stale: bool,
}

/// One drive motor + one steering motor, behind a common contract.
pub trait ActuatorChannel: Send {
    /// Latest measured state. Never fails: on a read fault the previous
    /// snapshot is returned with `stale` set.
    fn refresh(&mut self) -> ModuleSensorSnapshot;

    /// Open-loop output, clamped to the supply range.
    fn apply_voltage(&mut self, drive_volts: f64, turn_volts: f64);

    /// Open-loop drive output only; the steering keeps whatever it was last told.
    fn apply_drive_voltage(&mut self, volts: f64);

    /// Closed-loop drive velocity (m/s) with acceleration feedforward (m/s^2).
    fn apply_drive_setpoint(&mut self, velocity: f64, acceleration: f64);

    /// Closed-loop steering to an absolute module angle.
    fn apply_turn_setpoint(&mut self, angle: Rotation2d);

    fn set_brake_mode(&mut self, enabled: bool);
}

/// Measured speed below which a zero setpoint is sent as plain zero volts.
pub const REST_VELOCITY_TOLERANCE: f64 = 0.1;

/// True when a drive setpoint should collapse to a zero-voltage command
/// instead of running the velocity loop around zero.
pub fn is_rest_command(velocity: f64, acceleration: f64, measured_velocity: f64) -> bool {
    velocity == 0.0 && acceleration == 0.0 && measured_velocity.abs() <= REST_VELOCITY_TOLERANCE
}

pub fn clamp_volts(volts: f64, supply: f64) -> f64 {
    if volts.is_nan() {
        return 0.0;
    }
    volts.clamp(-supply, supply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_command_requires_all_three_near_zero() {
        assert!(is_rest_command(0.0, 0.0, 0.05));
        assert!(is_rest_command(0.0, 0.0, -0.1));
        assert!(!is_rest_command(0.0, 0.0, 0.5));
        assert!(!is_rest_command(0.01, 0.0, 0.0));
        assert!(!is_rest_command(0.0, 0.3, 0.0));
    }

    #[test]
    fn test_clamp_volts() {
        assert_eq!(clamp_volts(20.0, 12.0), 12.0);
        assert_eq!(clamp_volts(-20.0, 12.0), -12.0);
        assert_eq!(clamp_volts(3.0, 12.0), 3.0);
        assert_eq!(clamp_volts(f64::NAN, 12.0), 0.0);
    }
}
