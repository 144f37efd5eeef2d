// Timeouts, topics, rates and drivetrain configuration
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::{FeedforwardGains, PidGains, ResponseCurve};
use crate::geometry::Translation2d;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Odometry sampler frequency (must stay above LOOP_HZ)
pub const ODOMETRY_HZ: u64 = 250;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_DRIVE: &str = "swerve/cmd/drive"; // commands
pub const TOPIC_POSE: &str = "swerve/state/pose"; // odometry
pub const TOPIC_MODULES: &str = "swerve/state/modules"; // per-module telemetry
pub const TOPIC_HEALTH: &str = "swerve/state/health"; // health status

// Serial port for the Feetech servo bus
pub const SERVO_PORT: &str = "/dev/ttyACM0";

// Nominal actuator supply; voltage commands are clamped to +/- this
pub const SUPPLY_VOLTAGE: f64 = 12.0;

// Samples kept per odometry signal between two control ticks
pub const QUEUE_CAPACITY: usize = 20;

/// Configuration faults. All of these abort startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("module {module}: {reason}")]
    InvalidModule { module: String, reason: String },

    #[error("hardware id {id} used by both {first} and {second}")]
    DuplicateId {
        id: u8,
        first: String,
        second: String,
    },

    #[error("invalid drivetrain configuration: {0}")]
    Invalid(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Fixed physical and calibration parameters of one swerve module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConstants {
    pub name: String,
    /// Module center relative to the robot center, meters (x forward, y left).
    pub location: [f64; 2],
    pub drive_id: u8,
    pub turn_id: u8,
    /// Motor rotations per wheel rotation.
    pub drive_gear_ratio: f64,
    /// Motor rotations per module (azimuth) rotation.
    pub turn_gear_ratio: f64,
    pub wheel_radius: f64,
    /// Absolute encoder reading (radians) when the wheel points forward.
    #[serde(default)]
    pub turn_zero_offset: f64,
    pub drive_pid: PidGains,
    pub drive_ff: FeedforwardGains,
    pub turn_pid: PidGains,
}

impl ModuleConstants {
    pub fn location(&self) -> Translation2d {
        Translation2d::new(self.location[0], self.location[1])
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidModule {
            module: self.name.clone(),
            reason: reason.to_string(),
        };

        if !self.location.iter().all(|v| v.is_finite()) {
            return Err(invalid("location must be finite"));
        }
        if !(self.drive_gear_ratio.is_finite() && self.drive_gear_ratio > 0.0) {
            return Err(invalid("drive gear ratio must be positive"));
        }
        if !(self.turn_gear_ratio.is_finite() && self.turn_gear_ratio > 0.0) {
            return Err(invalid("turn gear ratio must be positive"));
        }
        if !(self.wheel_radius.is_finite() && self.wheel_radius > 0.0) {
            return Err(invalid("wheel radius must be positive"));
        }
        if !self.turn_zero_offset.is_finite() {
            return Err(invalid("turn zero offset must be finite"));
        }
        if self.drive_id == self.turn_id {
            return Err(ConfigError::DuplicateId {
                id: self.drive_id,
                first: format!("{} drive", self.name),
                second: format!("{} turn", self.name),
            });
        }
        Ok(())
    }
}

/// Heading-lock controller tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadingLockConfig {
    pub pid: PidGains,
    #[serde(default)]
    pub curve: ResponseCurve,
    /// Heading tolerance (rad) and heading-rate tolerance (rad/s).
    pub tolerance: [f64; 2],
}

impl Default for HeadingLockConfig {
    fn default() -> Self {
        Self {
            pid: PidGains::new(1.2, 0.0, 0.05),
            curve: ResponseCurve::Linear,
            tolerance: [0.08, 0.01],
        }
    }
}

/// Everything the drivetrain needs at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriveConfig {
    /// Front-left, front-right, back-left, back-right.
    pub modules: [ModuleConstants; 4],
    pub max_linear_speed: f64,
    #[serde(default = "default_loop_hz")]
    pub loop_hz: f64,
    #[serde(default = "default_odometry_hz")]
    pub odometry_hz: f64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub heading_lock: HeadingLockConfig,
}

fn default_loop_hz() -> f64 {
    LOOP_HZ as f64
}

fn default_odometry_hz() -> f64 {
    ODOMETRY_HZ as f64
}

fn default_queue_capacity() -> usize {
    QUEUE_CAPACITY
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::simulated()
    }
}

impl DriveConfig {
    /// Square 0.5 m wheelbase with Kraken drive / Falcon steer physics.
    pub fn simulated() -> Self {
        let module = |name: &str, x: f64, y: f64, drive_id: u8| ModuleConstants {
            name: name.to_string(),
            location: [x, y],
            drive_id,
            turn_id: drive_id + 1,
            drive_gear_ratio: 6.75,
            turn_gear_ratio: 150.0 / 7.0,
            wheel_radius: 0.0508,
            turn_zero_offset: 0.0,
            drive_pid: PidGains::new(1.0, 0.0, 0.0),
            drive_ff: FeedforwardGains::new(0.0, 2.52, 0.0),
            turn_pid: PidGains::new(8.0, 0.0, 0.0),
        };

        Self {
            modules: [
                module("front_left", 0.25, 0.25, 1),
                module("front_right", 0.25, -0.25, 3),
                module("back_left", -0.25, 0.25, 5),
                module("back_right", -0.25, -0.25, 7),
            ],
            max_linear_speed: 4.5,
            loop_hz: default_loop_hz(),
            odometry_hz: default_odometry_hz(),
            queue_capacity: default_queue_capacity(),
            heading_lock: HeadingLockConfig::default(),
        }
    }

    /// Direct-drive STS3215 servos on a 0.3 m square frame.
    pub fn feetech() -> Self {
        let module = |name: &str, x: f64, y: f64, drive_id: u8| ModuleConstants {
            name: name.to_string(),
            location: [x, y],
            drive_id,
            turn_id: drive_id + 1,
            drive_gear_ratio: 1.0,
            turn_gear_ratio: 1.0,
            wheel_radius: 0.05,
            turn_zero_offset: 0.0,
            drive_pid: PidGains::new(10.0, 0.0, 0.0),
            drive_ff: FeedforwardGains::new(0.5, 48.0, 0.0),
            turn_pid: PidGains::new(6.0, 0.0, 0.1),
        };

        Self {
            modules: [
                module("front_left", 0.15, 0.15, 1),
                module("front_right", 0.15, -0.15, 3),
                module("back_left", -0.15, 0.15, 5),
                module("back_right", -0.15, -0.15, 7),
            ],
            max_linear_speed: 0.25,
            loop_hz: default_loop_hz(),
            odometry_hz: default_odometry_hz(),
            queue_capacity: default_queue_capacity(),
            heading_lock: HeadingLockConfig::default(),
        }
    }

    /// Load and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: DriveConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn loop_period(&self) -> f64 {
        1.0 / self.loop_hz
    }

    /// Distance from the robot center to the farthest module.
    pub fn drive_base_radius(&self) -> f64 {
        self.modules
            .iter()
            .map(|m| m.location().norm())
            .fold(0.0, f64::max)
    }

    pub fn max_angular_speed(&self) -> f64 {
        self.max_linear_speed / self.drive_base_radius()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_linear_speed.is_finite() && self.max_linear_speed > 0.0) {
            return Err(ConfigError::Invalid(
                "max linear speed must be positive".to_string(),
            ));
        }
        if !(self.loop_hz.is_finite() && self.loop_hz > 0.0) {
            return Err(ConfigError::Invalid("loop rate must be positive".to_string()));
        }
        if !(self.odometry_hz > self.loop_hz) {
            return Err(ConfigError::Invalid(format!(
                "odometry rate ({} Hz) must exceed loop rate ({} Hz)",
                self.odometry_hz, self.loop_hz
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let mut seen: HashMap<u8, String> = HashMap::new();
        for module in &self.modules {
            module.validate()?;
            for (id, role) in [(module.drive_id, "drive"), (module.turn_id, "turn")] {
                let label = format!("{} {}", module.name, role);
                if let Some(first) = seen.insert(id, label.clone()) {
                    return Err(ConfigError::DuplicateId {
                        id,
                        first,
                        second: label,
                    });
                }
            }
        }

        if self.drive_base_radius() <= 0.0 {
            return Err(ConfigError::Invalid(
                "all modules sit on the robot center".to_string(),
            ));
        }
        Ok(())
    }

    /// Extra checks for the Feetech servo adapter, whose steering encoder
    /// only covers a single revolution.
    pub fn validate_for_hardware(&self) -> Result<(), ConfigError> {
        self.validate()?;
        for module in &self.modules {
            if module.turn_gear_ratio != 1.0 {
                return Err(ConfigError::InvalidModule {
                    module: module.name.clone(),
                    reason: "steering servo must be directly coupled (turn ratio 1.0)"
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        DriveConfig::simulated().validate().unwrap();
        DriveConfig::feetech().validate_for_hardware().unwrap();
    }

    #[test]
    fn test_sim_preset_rejected_for_hardware() {
        let err = DriveConfig::simulated().validate_for_hardware().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidModule { .. }));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config = DriveConfig::simulated();
        config.modules[2].drive_id = config.modules[0].turn_id;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateId { id: 2, .. }));
        assert!(err.to_string().contains("front_left turn"));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let mut config = DriveConfig::simulated();
        config.modules[1].wheel_radius = 0.0;
        assert!(config.validate().is_err());

        let mut config = DriveConfig::simulated();
        for module in &mut config.modules {
            module.location = [0.0, 0.0];
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_odometry_must_outpace_loop() {
        let mut config = DriveConfig::simulated();
        config.odometry_hz = config.loop_hz;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_with_defaults() {
        let mut value = serde_json::to_value(DriveConfig::simulated()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("loop_hz");
        object.remove("heading_lock");
        let parsed: DriveConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.loop_hz, LOOP_HZ as f64);
        assert_eq!(parsed.heading_lock, HeadingLockConfig::default());
    }

    #[test]
    fn test_max_angular_speed() {
        let config = DriveConfig::simulated();
        let radius = 0.25f64.hypot(0.25);
        assert!((config.max_angular_speed() - 4.5 / radius).abs() < 1e-9);
    }
}
