// Wheel odometry: replays sensor samples into a field pose
//
// Each sample carries every module's cumulative distance and angle at one
// instant. Consecutive samples give per-module deltas, forward kinematics
// turns them into a robot-frame twist, and the twist is integrated along a
// constant-curvature arc with `Pose2d::exp`.

use tracing::warn;

use crate::geometry::{Pose2d, Rotation2d};
use crate::sampling::{OdometrySampler, SampleBatch, SignalId};

use super::kinematics::{MODULE_COUNT, ModulePosition, SwerveKinematics};

/// Module positions (and optionally a gyro heading) at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometrySample {
    pub timestamp: f64, // s, monotonic
    pub module_positions: [ModulePosition; MODULE_COUNT],
    /// Raw gyro yaw. When present it overrides the wheel-derived rotation.
    pub gyro_heading: Option<Rotation2d>,
}

/// Pose estimate integrated from odometry samples.
#[derive(Debug, Clone)]
pub struct SwerveOdometry {
    kinematics: SwerveKinematics,
    pose: Pose2d,
    previous_positions: [ModulePosition; MODULE_COUNT],
    previous_angle: Rotation2d,
    gyro_offset: Rotation2d,
    last_timestamp: Option<f64>,
}

impl SwerveOdometry {
    pub fn new(
        kinematics: SwerveKinematics,
        positions: [ModulePosition; MODULE_COUNT],
        pose: Pose2d,
    ) -> Self {
        Self {
            kinematics,
            pose,
            previous_positions: positions,
            previous_angle: pose.rotation,
            gyro_offset: pose.rotation,
            last_timestamp: None,
        }
    }

    pub fn pose(&self) -> Pose2d {
        self.pose
    }

    /// Jump to `pose`. `positions` and `gyro` are the current readings, so
    /// the next sample integrates only motion after this call.
    pub fn reset(
        &mut self,
        pose: Pose2d,
        positions: [ModulePosition; MODULE_COUNT],
        gyro: Option<Rotation2d>,
    ) {
        self.pose = pose;
        self.previous_positions = positions;
        self.previous_angle = pose.rotation;
        self.gyro_offset = match gyro {
            Some(gyro) => pose.rotation - gyro,
            None => pose.rotation,
        };
    }

    /// Integrate one sample. Returns false, leaving the pose untouched, if
    /// the sample is not newer than the last one applied.
    pub fn update(&mut self, sample: &OdometrySample) -> bool {
        if let Some(previous) = self.last_timestamp {
            if !(sample.timestamp > previous) {
                warn!(
                    "Skipping odometry sample at {:.4}s: not after {:.4}s",
                    sample.timestamp, previous
                );
                return false;
            }
        }
        self.last_timestamp = Some(sample.timestamp);

        let deltas: [ModulePosition; MODULE_COUNT] = std::array::from_fn(|i| {
            let current = sample.module_positions[i];
            ModulePosition::new(
                current.distance - self.previous_positions[i].distance,
                current.angle,
            )
        });
        self.previous_positions = sample.module_positions;

        let mut twist = self.kinematics.to_twist(&deltas);
        match sample.gyro_heading {
            Some(gyro) => {
                let angle = gyro + self.gyro_offset;
                twist.dtheta = (angle - self.previous_angle).radians();
                self.pose = Pose2d {
                    rotation: angle,
                    ..self.pose.exp(twist)
                };
            }
            None => self.pose = self.pose.exp(twist),
        }
        self.previous_angle = self.pose.rotation;
        true
    }
}

/// Where each module's signals sit inside the sampler's batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalLayout {
    /// (drive distance in m, steering angle in rad) per module.
    pub modules: [(SignalId, SignalId); MODULE_COUNT],
    /// Gyro yaw in rad, if the robot has one.
    pub gyro: Option<SignalId>,
}

impl SignalLayout {
    /// Rebuild odometry samples from a drained batch, oldest first.
    pub fn samples(&self, batch: &SampleBatch) -> Vec<OdometrySample> {
        (0..batch.len())
            .map(|i| OdometrySample {
                timestamp: batch.timestamps[i],
                module_positions: self.modules.map(|(drive, turn)| {
                    ModulePosition::new(
                        batch.value(drive, i),
                        Rotation2d::from_radians(batch.value(turn, i)),
                    )
                }),
                gyro_heading: self
                    .gyro
                    .map(|gyro| Rotation2d::from_radians(batch.value(gyro, i))),
            })
            .collect()
    }
}

/// A running sampler together with the meaning of its signals.
pub struct OdometryFeed {
    sampler: OdometrySampler,
    layout: SignalLayout,
}

impl OdometryFeed {
    pub fn new(sampler: OdometrySampler, layout: SignalLayout) -> Self {
        Self { sampler, layout }
    }

    /// Every sample taken since the previous call.
    pub fn drain(&self) -> Vec<OdometrySample> {
        self.layout.samples(&self.sampler.drain())
    }
}
