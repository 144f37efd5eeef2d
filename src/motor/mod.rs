// Actuation layer for swerve modules
//
// Provides:
// - The actuator channel contract shared by hardware and simulation
// - Feetech STS3215 serial protocol implementation
// - A physical module channel on Feetech servos
// - A DC-motor physics module channel for simulation

pub mod channel;
pub mod feetech;
pub mod hardware;
pub mod sim;

pub use channel::{ActuatorChannel, ModuleSensorSnapshot};
pub use feetech::{FeetechBus, FeetechError};
pub use hardware::{FeetechModuleChannel, SharedBus, shared_bus};
pub use sim::{DcMotor, DcMotorSim, SimModuleChannel};
