// Swerve drive kinematics
//
// Inverse: chassis velocity -> per-module (speed, angle).
// Forward: per-module velocities or distance deltas -> chassis velocity or twist,
// via the least-squares pseudo-inverse of the inverse matrix.
//
// Each module contributes two rows to the inverse matrix:
//   [1, 0, -y]      module vx = vx - omega * y
//   [0, 1,  x]      module vy = vy + omega * x

use nalgebra::{SMatrix, SVector};

use crate::config::ConfigError;
use crate::geometry::{Pose2d, Rotation2d, Translation2d, Twist2d};

pub const MODULE_COUNT: usize = 4;

/// Below this the module is considered to be asked not to move at all.
const ZERO_SPEED_EPSILON: f64 = 1e-9;

/// Which frame a chassis velocity is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChassisFrame {
    #[default]
    Robot,
    Field,
}

/// Robot velocity: forward (m/s), left (m/s), counter-clockwise (rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChassisSpeeds {
    pub vx: f64,
    pub vy: f64,
    pub omega: f64,
    pub frame: ChassisFrame,
}

impl ChassisSpeeds {
    /// Robot-relative speeds.
    pub const fn new(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            vx,
            vy,
            omega,
            frame: ChassisFrame::Robot,
        }
    }

    pub const fn field_relative(vx: f64, vy: f64, omega: f64) -> Self {
        Self {
            vx,
            vy,
            omega,
            frame: ChassisFrame::Field,
        }
    }

    pub fn in_frame(self, frame: ChassisFrame) -> Self {
        Self { frame, ..self }
    }

    pub fn is_zero(&self) -> bool {
        self.vx == 0.0 && self.vy == 0.0 && self.omega == 0.0
    }

    /// Express these speeds in the robot frame, given the robot heading.
    /// Robot-relative speeds are returned unchanged.
    pub fn to_robot_relative(self, heading: Rotation2d) -> Self {
        match self.frame {
            ChassisFrame::Robot => self,
            ChassisFrame::Field => {
                let v = Translation2d::new(self.vx, self.vy).rotate_by(-heading);
                Self::new(v.x, v.y, self.omega)
            }
        }
    }

    /// Correct for the drift of holding a constant velocity over one period.
    ///
    /// Driving straight while spinning at a constant command traces an arc
    /// that skews away from the commanded direction. The returned speeds,
    /// held for `dt`, land on the pose the requested speeds describe.
    pub fn discretize(self, dt: f64) -> Self {
        if dt <= 0.0 {
            return self;
        }
        let target = Pose2d::new(
            self.vx * dt,
            self.vy * dt,
            Rotation2d::from_radians(self.omega * dt),
        );
        let twist = Pose2d::default().log(target);
        Self {
            vx: twist.dx / dt,
            vy: twist.dy / dt,
            omega: twist.dtheta / dt,
            frame: self.frame,
        }
    }
}

/// Speed (m/s) and angle of one module.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModuleState {
    pub speed: f64,
    pub angle: Rotation2d,
}

impl ModuleState {
    pub fn new(speed: f64, angle: Rotation2d) -> Self {
        Self { speed, angle }
    }

    /// Equivalent state that needs at most a quarter turn of steering, and
    /// whether the wheel direction was reversed to get there.
    pub fn optimize(self, current: Rotation2d) -> (Self, bool) {
        let delta = self.angle - current;
        if delta.radians().abs() > std::f64::consts::FRAC_PI_2 {
            let flipped = Self {
                speed: -self.speed,
                angle: self.angle.rotate_by(Rotation2d::from_radians(std::f64::consts::PI)),
            };
            (flipped, true)
        } else {
            (self, false)
        }
    }

    /// Scale the speed by the cosine of the remaining steering error so a
    /// wheel still turning does not drive sideways.
    pub fn cosine_scaled(self, current: Rotation2d) -> Self {
        let mut scale = (self.angle - current).cos();
        // Perpendicular wheels must not drive at all
        if scale.abs() < ZERO_SPEED_EPSILON {
            scale = 0.0;
        }
        Self {
            speed: self.speed * scale,
            ..self
        }
    }
}

/// Cumulative distance (m) and angle of one module.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ModulePosition {
    pub distance: f64,
    pub angle: Rotation2d,
}

impl ModulePosition {
    pub fn new(distance: f64, angle: Rotation2d) -> Self {
        Self { distance, angle }
    }
}

/// Kinematics of four modules at fixed locations around the robot center.
#[derive(Debug, Clone)]
pub struct SwerveKinematics {
    locations: [Translation2d; MODULE_COUNT],
    inverse: SMatrix<f64, 8, 3>,
    forward: SMatrix<f64, 3, 8>,
    last_angles: [Rotation2d; MODULE_COUNT],
}

impl SwerveKinematics {
    /// Fails if the module layout cannot observe chassis rotation, e.g.
    /// when two modules share a location.
    pub fn new(locations: [Translation2d; MODULE_COUNT]) -> Result<Self, ConfigError> {
        for (i, a) in locations.iter().enumerate() {
            for b in &locations[i + 1..] {
                if a.distance(*b) < 1e-6 {
                    return Err(ConfigError::Invalid(format!(
                        "two modules share location ({}, {})",
                        a.x, a.y
                    )));
                }
            }
        }

        let mut inverse = SMatrix::<f64, 8, 3>::zeros();
        for (i, location) in locations.iter().enumerate() {
            inverse[(2 * i, 0)] = 1.0;
            inverse[(2 * i, 2)] = -location.y;
            inverse[(2 * i + 1, 1)] = 1.0;
            inverse[(2 * i + 1, 2)] = location.x;
        }
        let forward = inverse
            .pseudo_inverse(1e-9)
            .map_err(|e| ConfigError::Invalid(format!("singular module layout: {}", e)))?;

        Ok(Self {
            locations,
            inverse,
            forward,
            last_angles: [Rotation2d::ZERO; MODULE_COUNT],
        })
    }

    pub fn locations(&self) -> &[Translation2d; MODULE_COUNT] {
        &self.locations
    }

    /// Angles a zero command will hold the modules at.
    pub fn reset_headings(&mut self, angles: [Rotation2d; MODULE_COUNT]) {
        self.last_angles = angles;
    }

    /// Module states for robot-relative chassis speeds.
    ///
    /// A zero command keeps every module at its last angle instead of
    /// snapping the wheels back to forward.
    pub fn to_module_states(&mut self, speeds: ChassisSpeeds) -> [ModuleState; MODULE_COUNT] {
        if speeds.is_zero() {
            return self.last_angles.map(|angle| ModuleState::new(0.0, angle));
        }

        let chassis = SVector::<f64, 3>::new(speeds.vx, speeds.vy, speeds.omega);
        let module_vectors = self.inverse * chassis;

        let states = std::array::from_fn(|i| {
            let (x, y) = (module_vectors[2 * i], module_vectors[2 * i + 1]);
            let speed = x.hypot(y);
            let angle = if speed > ZERO_SPEED_EPSILON {
                Rotation2d::from_xy(x, y)
            } else {
                self.last_angles[i]
            };
            ModuleState::new(speed, angle)
        });
        self.last_angles = states.map(|s: ModuleState| s.angle);
        states
    }

    /// Robot-relative chassis speeds that best explain the module states.
    pub fn to_chassis_speeds(&self, states: &[ModuleState; MODULE_COUNT]) -> ChassisSpeeds {
        let chassis = self.solve(states.map(|s| (s.speed, s.angle)));
        ChassisSpeeds::new(chassis[0], chassis[1], chassis[2])
    }

    /// Robot-relative twist from each module's distance travelled and
    /// angle over one interval.
    pub fn to_twist(&self, deltas: &[ModulePosition; MODULE_COUNT]) -> Twist2d {
        let chassis = self.solve(deltas.map(|d| (d.distance, d.angle)));
        Twist2d::new(chassis[0], chassis[1], chassis[2])
    }

    fn solve(&self, modules: [(f64, Rotation2d); MODULE_COUNT]) -> SVector<f64, 3> {
        let mut module_vectors = SVector::<f64, 8>::zeros();
        for (i, (magnitude, angle)) in modules.iter().enumerate() {
            module_vectors[2 * i] = magnitude * angle.cos();
            module_vectors[2 * i + 1] = magnitude * angle.sin();
        }
        self.forward * module_vectors
    }

    /// Scale all module speeds down together so none exceeds `max_speed`.
    ///
    /// The ratio between modules is kept, so the robot still follows the
    /// commanded path, only slower.
    pub fn desaturate(states: &mut [ModuleState; MODULE_COUNT], max_speed: f64) {
        let fastest = states.iter().map(|s| s.speed.abs()).fold(0.0, f64::max);
        if fastest > max_speed {
            let scale = max_speed / fastest;
            for state in states.iter_mut() {
                state.speed *= scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn square() -> SwerveKinematics {
        SwerveKinematics::new([
            Translation2d::new(0.25, 0.25),
            Translation2d::new(0.25, -0.25),
            Translation2d::new(-0.25, 0.25),
            Translation2d::new(-0.25, -0.25),
        ])
        .unwrap()
    }

    #[test]
    fn test_straight_drive() {
        let states = square().to_module_states(ChassisSpeeds::new(1.0, 0.0, 0.0));
        for state in states {
            assert_relative_eq!(state.speed, 1.0, epsilon = 1e-12);
            assert_relative_eq!(state.angle.radians(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_pure_rotation_is_tangential() {
        let mut kinematics = square();
        let locations = *kinematics.locations();
        let states = kinematics.to_module_states(ChassisSpeeds::new(0.0, 0.0, 1.0));
        for (state, location) in states.iter().zip(locations) {
            assert_relative_eq!(state.speed, location.norm(), epsilon = 1e-12);
            let between = (state.angle - location.angle()).radians();
            assert_relative_eq!(between, FRAC_PI_2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_forward_inverts_inverse() {
        let mut kinematics = square();
        for speeds in [
            ChassisSpeeds::new(1.0, 0.0, 0.0),
            ChassisSpeeds::new(0.5, -0.3, 0.0),
            ChassisSpeeds::new(0.0, 0.0, 2.0),
            ChassisSpeeds::new(1.2, 0.7, -1.5),
        ] {
            let states = kinematics.to_module_states(speeds);
            let back = kinematics.to_chassis_speeds(&states);
            assert_relative_eq!(back.vx, speeds.vx, epsilon = 1e-9);
            assert_relative_eq!(back.vy, speeds.vy, epsilon = 1e-9);
            assert_relative_eq!(back.omega, speeds.omega, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_command_holds_last_angles() {
        let mut kinematics = square();
        kinematics.to_module_states(ChassisSpeeds::new(0.0, 1.0, 0.0));
        let states = kinematics.to_module_states(ChassisSpeeds::default());
        for state in states {
            assert_eq!(state.speed, 0.0);
            assert_relative_eq!(state.angle.radians(), FRAC_PI_2, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_twist_from_equal_deltas() {
        let deltas = [ModulePosition::new(0.1, Rotation2d::from_degrees(90.0)); MODULE_COUNT];
        let twist = square().to_twist(&deltas);
        assert_relative_eq!(twist.dx, 0.0, epsilon = 1e-12);
        assert_relative_eq!(twist.dy, 0.1, epsilon = 1e-12);
        assert_relative_eq!(twist.dtheta, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_desaturate_keeps_ratios() {
        let mut states = [
            ModuleState::new(6.0, Rotation2d::ZERO),
            ModuleState::new(3.0, Rotation2d::ZERO),
            ModuleState::new(-1.5, Rotation2d::ZERO),
            ModuleState::new(0.0, Rotation2d::ZERO),
        ];
        SwerveKinematics::desaturate(&mut states, 4.0);
        assert_relative_eq!(states[0].speed, 4.0);
        assert_relative_eq!(states[1].speed, 2.0);
        assert_relative_eq!(states[2].speed, -1.0);
        assert_eq!(states[3].speed, 0.0);

        let mut slow = [ModuleState::new(1.0, Rotation2d::ZERO); MODULE_COUNT];
        SwerveKinematics::desaturate(&mut slow, 4.0);
        assert_eq!(slow[0].speed, 1.0);
    }

    #[test]
    fn test_field_relative_rotates_by_heading() {
        let speeds = ChassisSpeeds::field_relative(1.0, 0.0, 0.5);
        let robot = speeds.to_robot_relative(Rotation2d::from_degrees(90.0));
        assert_eq!(robot.frame, ChassisFrame::Robot);
        // Field +X is robot -Y when facing field +Y
        assert_relative_eq!(robot.vx, 0.0, epsilon = 1e-12);
        assert_relative_eq!(robot.vy, -1.0, epsilon = 1e-12);
        assert_eq!(robot.omega, 0.5);
    }

    #[test]
    fn test_discretize_lands_on_target_pose() {
        let dt = 0.02;
        let speeds = ChassisSpeeds::new(2.0, 0.0, PI);
        let discrete = speeds.discretize(dt);
        let reached = Pose2d::default().exp(Twist2d::new(
            discrete.vx * dt,
            discrete.vy * dt,
            discrete.omega * dt,
        ));
        assert_relative_eq!(reached.x(), 2.0 * dt, epsilon = 1e-12);
        assert_relative_eq!(reached.y(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(reached.rotation.radians(), PI * dt, epsilon = 1e-12);
        // Without rotation nothing changes
        let straight = ChassisSpeeds::new(1.0, 0.5, 0.0).discretize(dt);
        assert_relative_eq!(straight.vx, 1.0, epsilon = 1e-12);
        assert_relative_eq!(straight.vy, 0.5, epsilon = 1e-12);
        assert_eq!(straight.omega, 0.0);
    }

    #[test]
    fn test_optimize_flips_past_quarter_turn() {
        let state = ModuleState::new(2.0, Rotation2d::from_degrees(170.0));
        let (optimized, flipped) = state.optimize(Rotation2d::ZERO);
        assert!(flipped);
        assert_relative_eq!(optimized.angle.degrees(), -10.0, epsilon = 1e-9);
        assert_eq!(optimized.speed, -2.0);
        assert!((optimized.angle - Rotation2d::ZERO).radians().abs() <= FRAC_PI_2);

        let near = ModuleState::new(2.0, Rotation2d::from_degrees(60.0));
        assert_eq!(near.optimize(Rotation2d::ZERO), (near, false));

        // A wheel at rest still reports the flip
        let rest = ModuleState::new(0.0, Rotation2d::from_degrees(170.0));
        assert!(rest.optimize(Rotation2d::ZERO).1);
    }

    #[test]
    fn test_cosine_scale_boundaries() {
        let state = ModuleState::new(3.0, Rotation2d::from_degrees(90.0));
        assert_eq!(state.cosine_scaled(Rotation2d::ZERO).speed, 0.0);
        assert_eq!(state.cosine_scaled(Rotation2d::from_degrees(90.0)).speed, 3.0);
        let halfway = state.cosine_scaled(Rotation2d::from_degrees(30.0));
        assert_relative_eq!(halfway.speed, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_shared_location_is_rejected() {
        let result = SwerveKinematics::new([Translation2d::new(0.2, 0.2); MODULE_COUNT]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
