// Heading lock: keep the robot pointed at a field point

use std::f64::consts::PI;

use crate::config::HeadingLockConfig;
use crate::control::{PidController, ResponseCurve};
use crate::geometry::{Pose2d, Rotation2d, Translation2d};

use super::kinematics::ChassisSpeeds;

pub struct HeadingLock {
    pid: PidController,
    curve: ResponseCurve,
}

impl HeadingLock {
    pub fn new(config: &HeadingLockConfig, period: f64) -> Self {
        Self {
            pid: PidController::new(config.pid, period)
                .with_continuous_input(-PI, PI)
                .with_tolerance(config.tolerance[0], config.tolerance[1]),
            curve: config.curve,
        }
    }

    /// Heading from `pose` toward `target`.
    pub fn target_heading(pose: &Pose2d, target: Translation2d) -> Rotation2d {
        (target - pose.translation).angle()
    }

    /// Rotation rate (rad/s) that turns the robot toward `target`.
    ///
    /// The PID output is treated as a fraction of `max_angular_speed`,
    /// shaped by the configured response curve. Zero once on target.
    pub fn omega(&mut self, pose: &Pose2d, target: Translation2d, max_angular_speed: f64) -> f64 {
        let desired = Self::target_heading(pose, target);
        let output = self
            .pid
            .calculate(pose.rotation.wrapped().radians(), desired.radians())
            .clamp(-1.0, 1.0);
        if self.pid.at_setpoint() {
            return 0.0;
        }
        self.curve.apply(output) * max_angular_speed
    }

    /// Turn in place toward `target`.
    pub fn speeds(
        &mut self,
        pose: &Pose2d,
        target: Translation2d,
        max_angular_speed: f64,
    ) -> ChassisSpeeds {
        ChassisSpeeds::field_relative(0.0, 0.0, self.omega(pose, target, max_angular_speed))
    }

    pub fn at_setpoint(&self) -> bool {
        self.pid.at_setpoint()
    }

    /// Forget accumulated state; call when a new target is engaged.
    pub fn reset(&mut self) {
        self.pid.reset();
    }
}
