// Planar geometry for the drivetrain: rotations, translations, poses and twists.
//
// Frame convention: X forward, Y left, angles counter-clockwise positive.

use std::f64::consts::PI;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Below this magnitude a twist angle is treated as zero and the
/// exp/log maps switch to their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-9;

/// A planar rotation, stored as its angle and the matching unit vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation2d {
    radians: f64,
    cos: f64,
    sin: f64,
}

impl Default for Rotation2d {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Rotation2d {
    pub const ZERO: Rotation2d = Rotation2d {
        radians: 0.0,
        cos: 1.0,
        sin: 0.0,
    };

    pub fn from_radians(radians: f64) -> Self {
        Self {
            radians,
            cos: radians.cos(),
            sin: radians.sin(),
        }
    }

    pub fn from_degrees(degrees: f64) -> Self {
        Self::from_radians(degrees.to_radians())
    }

    /// Rotation pointing along the vector (x, y). A zero vector yields `ZERO`.
    pub fn from_xy(x: f64, y: f64) -> Self {
        let magnitude = x.hypot(y);
        let (cos, sin) = if magnitude > 1e-6 {
            (x / magnitude, y / magnitude)
        } else {
            (1.0, 0.0)
        };
        Self {
            radians: sin.atan2(cos),
            cos,
            sin,
        }
    }

    pub fn radians(&self) -> f64 {
        self.radians
    }

    pub fn degrees(&self) -> f64 {
        self.radians.to_degrees()
    }

    pub fn cos(&self) -> f64 {
        self.cos
    }

    pub fn sin(&self) -> f64 {
        self.sin
    }

    /// Compose two rotations. The result is wrapped into (-π, π].
    pub fn rotate_by(&self, other: Rotation2d) -> Self {
        Self::from_xy(
            self.cos * other.cos - self.sin * other.sin,
            self.cos * other.sin + self.sin * other.cos,
        )
    }

    /// Same rotation expressed in (-π, π].
    pub fn wrapped(&self) -> Self {
        Self {
            radians: angle_modulus(self.radians),
            ..*self
        }
    }
}

impl Add for Rotation2d {
    type Output = Rotation2d;

    fn add(self, rhs: Rotation2d) -> Rotation2d {
        self.rotate_by(rhs)
    }
}

impl Sub for Rotation2d {
    type Output = Rotation2d;

    fn sub(self, rhs: Rotation2d) -> Rotation2d {
        self.rotate_by(-rhs)
    }
}

impl Neg for Rotation2d {
    type Output = Rotation2d;

    fn neg(self) -> Rotation2d {
        Rotation2d {
            radians: -self.radians,
            cos: self.cos,
            sin: -self.sin,
        }
    }
}

/// Wrap an angle into (-π, π].
pub fn angle_modulus(radians: f64) -> f64 {
    let wrapped = (radians + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI { PI } else { wrapped }
}

/// A 2D vector in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Translation2d {
    pub x: f64,
    pub y: f64,
}

impl Translation2d {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn from_polar(distance: f64, angle: Rotation2d) -> Self {
        Self::new(distance * angle.cos(), distance * angle.sin())
    }

    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn angle(&self) -> Rotation2d {
        Rotation2d::from_xy(self.x, self.y)
    }

    pub fn rotate_by(&self, rotation: Rotation2d) -> Self {
        Self::new(
            self.x * rotation.cos() - self.y * rotation.sin(),
            self.x * rotation.sin() + self.y * rotation.cos(),
        )
    }

    pub fn distance(&self, other: Translation2d) -> f64 {
        (*self - other).norm()
    }
}

impl Add for Translation2d {
    type Output = Translation2d;

    fn add(self, rhs: Translation2d) -> Translation2d {
        Translation2d::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Translation2d {
    type Output = Translation2d;

    fn sub(self, rhs: Translation2d) -> Translation2d {
        Translation2d::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Neg for Translation2d {
    type Output = Translation2d;

    fn neg(self) -> Translation2d {
        Translation2d::new(-self.x, -self.y)
    }
}

impl Mul<f64> for Translation2d {
    type Output = Translation2d;

    fn mul(self, scalar: f64) -> Translation2d {
        Translation2d::new(self.x * scalar, self.y * scalar)
    }
}

impl Div<f64> for Translation2d {
    type Output = Translation2d;

    fn div(self, scalar: f64) -> Translation2d {
        Translation2d::new(self.x / scalar, self.y / scalar)
    }
}

/// An incremental motion along a constant-curvature arc, expressed in the
/// frame of the pose it starts from.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist2d {
    pub dx: f64,
    pub dy: f64,
    pub dtheta: f64,
}

impl Twist2d {
    pub const fn new(dx: f64, dy: f64, dtheta: f64) -> Self {
        Self { dx, dy, dtheta }
    }
}

/// Robot pose on the field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose2d {
    pub translation: Translation2d,
    pub rotation: Rotation2d,
}

impl Pose2d {
    pub fn new(x: f64, y: f64, rotation: Rotation2d) -> Self {
        Self {
            translation: Translation2d::new(x, y),
            rotation,
        }
    }

    pub fn x(&self) -> f64 {
        self.translation.x
    }

    pub fn y(&self) -> f64 {
        self.translation.y
    }

    /// Apply `delta`, expressed in this pose's frame.
    pub fn transform_by(&self, delta: Pose2d) -> Pose2d {
        Pose2d {
            translation: self.translation + delta.translation.rotate_by(self.rotation),
            rotation: self.rotation + delta.rotation,
        }
    }

    /// This pose expressed in the frame of `origin`.
    pub fn relative_to(&self, origin: Pose2d) -> Pose2d {
        Pose2d {
            translation: (self.translation - origin.translation).rotate_by(-origin.rotation),
            rotation: self.rotation - origin.rotation,
        }
    }

    /// Follow `twist` from this pose along a constant-curvature arc.
    ///
    /// Translation and heading change together: a twist with both forward
    /// motion and rotation traces an arc, not a straight line.
    pub fn exp(&self, twist: Twist2d) -> Pose2d {
        let (sin_theta, cos_theta) = twist.dtheta.sin_cos();
        let (s, c) = if twist.dtheta.abs() < SMALL_ANGLE {
            (
                1.0 - twist.dtheta * twist.dtheta / 6.0,
                0.5 * twist.dtheta,
            )
        } else {
            (
                sin_theta / twist.dtheta,
                (1.0 - cos_theta) / twist.dtheta,
            )
        };

        let delta = Pose2d {
            translation: Translation2d::new(
                twist.dx * s - twist.dy * c,
                twist.dx * c + twist.dy * s,
            ),
            rotation: Rotation2d::from_xy(cos_theta, sin_theta),
        };
        self.transform_by(delta)
    }

    /// The twist that carries this pose onto `end`. Inverse of [`Pose2d::exp`].
    pub fn log(&self, end: Pose2d) -> Twist2d {
        let transform = end.relative_to(*self);
        let dtheta = transform.rotation.radians();
        let half_dtheta = dtheta / 2.0;
        let cos_minus_one = transform.rotation.cos() - 1.0;

        let half_theta_by_tan = if cos_minus_one.abs() < SMALL_ANGLE {
            1.0 - dtheta * dtheta / 12.0
        } else {
            -(half_dtheta * transform.rotation.sin()) / cos_minus_one
        };

        let translation = transform
            .translation
            .rotate_by(Rotation2d::from_xy(half_theta_by_tan, -half_dtheta))
            * half_theta_by_tan.hypot(half_dtheta);

        Twist2d::new(translation.x, translation.y, dtheta)
    }
}
