// Swerve drivetrain motion-control core
//
// - geometry / control: math primitives shared by everything else
// - motor: actuator channels (Feetech servos or simulated DC motors)
// - sampling: high-rate odometry sampler thread
// - drive: module controllers, kinematics, odometry and the drivetrain supervisor
// - runtime: zenoh-facing 50Hz host loop

pub mod config;
pub mod control;
pub mod drive;
pub mod geometry;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod sampling;
