// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::drive::{ChassisFrame, ChassisSpeeds};
use crate::geometry::Pose2d;
use crate::motor::ModuleSensorSnapshot;

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveCommand {
    pub vx: f64,    // m/s, forward
    pub vy: f64,    // m/s, left
    pub omega: f64, // rad/s, counter-clockwise
    #[serde(default)]
    pub field_relative: bool,
    /// Field point to keep the robot facing; overrides `omega` when set.
    #[serde(default)]
    pub aim_at: Option<[f64; 2]>,
}

impl DriveCommand {
    pub fn speeds(&self) -> ChassisSpeeds {
        let frame = if self.field_relative {
            ChassisFrame::Field
        } else {
            ChassisFrame::Robot
        };
        ChassisSpeeds::new(self.vx, self.vy, self.omega).in_frame(frame)
    }
}

// Odometry output from runtime -> consumers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct PoseMessage {
    pub x: f64,
    pub y: f64,
    pub heading: f64, // rad
}

impl From<&Pose2d> for PoseMessage {
    fn from(pose: &Pose2d) -> Self {
        Self {
            x: pose.x(),
            y: pose.y(),
            heading: pose.rotation.radians(),
        }
    }
}

/// Per-module telemetry: what was asked for and what was measured.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleMessage {
    pub name: String,
    pub setpoint_speed: f64,
    pub setpoint_angle: f64,
    pub drive_position: f64,
    pub drive_velocity: f64,
    pub turn_angle: f64,
    pub drive_volts: f64,
    pub turn_volts: f64,
    pub drive_current: f64,
    pub turn_current: f64,
    pub stale: bool,
}

impl ModuleMessage {
    pub fn new(name: &str, setpoint: (f64, f64), snapshot: &ModuleSensorSnapshot) -> Self {
        Self {
            name: name.to_string(),
            setpoint_speed: setpoint.0,
            setpoint_angle: setpoint.1,
            drive_position: snapshot.drive_position,
            drive_velocity: snapshot.drive_velocity,
            turn_angle: snapshot.turn_absolute.radians(),
            drive_volts: snapshot.drive_applied_volts,
            turn_volts: snapshot.turn_applied_volts,
            drive_current: snapshot.drive_current,
            turn_current: snapshot.turn_current,
            stale: snapshot.stale,
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    SensorStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults_to_robot_relative() {
        let cmd: DriveCommand = serde_json::from_str(r#"{"vx":1.0,"vy":0.5,"omega":0.0}"#).unwrap();
        assert!(!cmd.field_relative);
        assert_eq!(cmd.aim_at, None);
        assert_eq!(cmd.speeds().frame, ChassisFrame::Robot);
    }

    #[test]
    fn test_health_serializes_snake_case() {
        let json = serde_json::to_string(&RuntimeHealth::CmdStale).unwrap();
        assert_eq!(json, "\"cmd_stale\"");
    }
}
