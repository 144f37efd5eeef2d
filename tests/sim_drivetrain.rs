//! Drivetrain scenario tests against simulated modules.
//!
//! Every scenario ticks the drivetrain the way the runtime does: `periodic()`
//! first, then the velocity command for that tick.
//!
//! | Scenario | Check |
//! |----------|-------|
//! | Straight 1 s at 1 m/s | x within 15 cm of 1 m, no drift |
//! | Spin 2 s at 1 rad/s | heading close to 2 rad, center stays put |
//! | Field-relative while facing +Y | robot still moves along field +X |
//! | Stop after driving | wheels come to rest, pose stops changing |
//! | Sampler-fed odometry | sub-tick samples land in the pose |
//!
//! Run with: `cargo test --test sim_drivetrain`

use approx::assert_relative_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swerve_zenoh_runtime::config::DriveConfig;
use swerve_zenoh_runtime::drive::{
    ChassisSpeeds, Drivetrain, MODULE_COUNT, OdometryFeed, SignalLayout,
};
use swerve_zenoh_runtime::geometry::{Pose2d, Rotation2d};
use swerve_zenoh_runtime::motor::{ActuatorChannel, SimModuleChannel};
use swerve_zenoh_runtime::sampling::SamplerBuilder;

fn sim() -> Drivetrain {
    Drivetrain::simulated(&DriveConfig::simulated()).unwrap()
}

fn drive_for(drivetrain: &mut Drivetrain, speeds: ChassisSpeeds, seconds: f64) {
    let ticks = (seconds * DriveConfig::simulated().loop_hz).round() as usize;
    for _ in 0..ticks {
        drivetrain.periodic();
        drivetrain.run_velocity(speeds);
    }
}

#[test]
fn straight_drive_tracks_distance() {
    let mut drivetrain = sim();
    drive_for(&mut drivetrain, ChassisSpeeds::new(1.0, 0.0, 0.0), 1.0);

    let pose = drivetrain.pose();
    assert!(pose.x() > 0.85 && pose.x() < 1.0, "x = {}", pose.x());
    assert!(pose.y().abs() < 0.01, "y = {}", pose.y());
    assert!(drivetrain.heading().radians().abs() < 0.01);

    for state in drivetrain.module_states() {
        assert_relative_eq!(state.speed, 1.0, epsilon = 0.05);
        assert!(state.angle.radians().abs() < 0.01);
    }
}

#[test]
fn spin_in_place_integrates_heading() {
    let mut drivetrain = sim();
    drive_for(&mut drivetrain, ChassisSpeeds::new(0.0, 0.0, 1.0), 2.0);

    let pose = drivetrain.pose();
    let heading = pose.rotation.radians();
    assert!(heading > 1.7 && heading < 2.05, "heading = {}", heading);
    assert!(pose.translation.norm() < 0.05, "drifted {}", pose.translation.norm());
    assert_relative_eq!(drivetrain.measured_speeds().omega, 1.0, epsilon = 0.05);
}

#[test]
fn field_relative_drive_ignores_robot_heading() {
    let mut drivetrain = sim();
    drivetrain.periodic();
    drivetrain.reset_pose(Pose2d::new(0.0, 0.0, Rotation2d::from_degrees(90.0)));

    drive_for(
        &mut drivetrain,
        ChassisSpeeds::field_relative(1.0, 0.0, 0.0),
        1.5,
    );

    let pose = drivetrain.pose();
    assert!(pose.x() > 1.0, "x = {}", pose.x());
    assert!(pose.y().abs() < 0.1, "y = {}", pose.y());
    assert_relative_eq!(pose.rotation.degrees(), 90.0, epsilon = 2.0);
}

#[test]
fn stop_brings_wheels_to_rest() {
    let mut drivetrain = sim();
    drive_for(&mut drivetrain, ChassisSpeeds::new(1.0, 0.5, 0.0), 1.0);

    for _ in 0..50 {
        drivetrain.periodic();
        drivetrain.stop();
    }
    for state in drivetrain.module_states() {
        assert!(state.speed.abs() < 0.01, "still moving at {}", state.speed);
    }

    let settled = drivetrain.pose();
    for _ in 0..10 {
        drivetrain.periodic();
        drivetrain.stop();
    }
    assert!(drivetrain.pose().translation.distance(settled.translation) < 1e-3);
}

#[test]
fn sampler_fed_odometry_replays_every_sample() {
    let config = DriveConfig::simulated();
    let distance = Arc::new(Mutex::new(0.0_f64));

    let mut builder = SamplerBuilder::new(config.odometry_hz, 100);
    let modules = std::array::from_fn(|_| {
        let shared = Arc::clone(&distance);
        let drive = builder.register(Box::new(move || Some(*shared.lock().unwrap())));
        let turn = builder.register(Box::new(|| Some(0.0)));
        (drive, turn)
    });
    let feed = OdometryFeed::new(
        builder.spawn().unwrap(),
        SignalLayout {
            modules,
            gyro: None,
        },
    );

    let channels: [Box<dyn ActuatorChannel>; MODULE_COUNT] = std::array::from_fn(|i| {
        Box::new(SimModuleChannel::new(&config.modules[i], config.loop_period()))
            as Box<dyn ActuatorChannel>
    });
    let mut drivetrain = Drivetrain::new(&config, channels, Some(feed)).unwrap();

    // Wheels roll forward in steps faster than the control loop drains
    for step in 1..=5 {
        *distance.lock().unwrap() = step as f64 * 0.1;
        std::thread::sleep(Duration::from_millis(10));
    }
    std::thread::sleep(Duration::from_millis(20));
    drivetrain.periodic();

    let pose = drivetrain.pose();
    assert_relative_eq!(pose.x(), 0.5, epsilon = 1e-9);
    assert_relative_eq!(pose.y(), 0.0, epsilon = 1e-9);
}
