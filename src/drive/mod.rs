// Swerve drive control and odometry
//
// Provides:
// - Swerve inverse/forward kinematics and chassis speed handling
// - Per-module setpoint optimization
// - Odometry replay from high-rate sensor samples
// - The drivetrain supervisor and a heading lock helper

mod align;
mod drivetrain;
pub mod kinematics;
mod module;
pub mod odometry;

pub use align::HeadingLock;
pub use drivetrain::Drivetrain;
pub use kinematics::{
    ChassisFrame, ChassisSpeeds, MODULE_COUNT, ModulePosition, ModuleState, SwerveKinematics,
};
pub use module::Module;
pub use odometry::{OdometryFeed, OdometrySample, SignalLayout, SwerveOdometry};
