// Feedback and feedforward primitives shared by the simulated and physical channels

use serde::{Deserialize, Serialize};

use crate::geometry::angle_modulus;

/// Proportional/integral/derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    #[serde(default)]
    pub ki: f64,
    #[serde(default)]
    pub kd: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

/// Static / velocity / acceleration feedforward gains (volts per unit).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FeedforwardGains {
    #[serde(default)]
    pub ks: f64,
    pub kv: f64,
    #[serde(default)]
    pub ka: f64,
}

impl FeedforwardGains {
    pub const fn new(ks: f64, kv: f64, ka: f64) -> Self {
        Self { ks, kv, ka }
    }

    /// Voltage needed to hold `velocity` while accelerating at `acceleration`.
    pub fn calculate(&self, velocity: f64, acceleration: f64) -> f64 {
        let static_term = if velocity == 0.0 {
            0.0
        } else {
            self.ks.copysign(velocity)
        };
        static_term + self.kv * velocity + self.ka * acceleration
    }
}

/// Discrete PID controller running at a fixed period.
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    period: f64,
    continuous: Option<(f64, f64)>,
    integrator_range: (f64, f64),
    position_tolerance: f64,
    velocity_tolerance: f64,
    error: f64,
    velocity_error: f64,
    total_error: f64,
    has_measurement: bool,
}

impl PidController {
    pub fn new(gains: PidGains, period: f64) -> Self {
        Self {
            gains,
            period,
            continuous: None,
            integrator_range: (-1.0, 1.0),
            position_tolerance: 0.05,
            velocity_tolerance: f64::INFINITY,
            error: 0.0,
            velocity_error: 0.0,
            total_error: 0.0,
            has_measurement: false,
        }
    }

    /// Treat the input as circular over `[min, max]`, so the error always
    /// takes the short way around.
    pub fn with_continuous_input(mut self, min: f64, max: f64) -> Self {
        self.continuous = Some((min, max));
        self
    }

    pub fn with_tolerance(mut self, position: f64, velocity: f64) -> Self {
        self.position_tolerance = position;
        self.velocity_tolerance = velocity;
        self
    }

    pub fn calculate(&mut self, measurement: f64, setpoint: f64) -> f64 {
        let previous_error = self.error;

        self.error = match self.continuous {
            Some((min, max)) => wrap_error(setpoint - measurement, min, max),
            None => setpoint - measurement,
        };
        self.velocity_error = if self.has_measurement {
            (self.error - previous_error) / self.period
        } else {
            0.0
        };
        self.has_measurement = true;

        if self.gains.ki != 0.0 {
            let (low, high) = self.integrator_range;
            self.total_error = (self.total_error + self.error * self.period)
                .clamp(low / self.gains.ki, high / self.gains.ki);
        }

        self.gains.kp * self.error
            + self.gains.ki * self.total_error
            + self.gains.kd * self.velocity_error
    }

    pub fn at_setpoint(&self) -> bool {
        self.has_measurement
            && self.error.abs() < self.position_tolerance
            && self.velocity_error.abs() < self.velocity_tolerance
    }

    pub fn reset(&mut self) {
        self.error = 0.0;
        self.velocity_error = 0.0;
        self.total_error = 0.0;
        self.has_measurement = false;
    }
}

fn wrap_error(error: f64, min: f64, max: f64) -> f64 {
    let half_range = (max - min) / 2.0;
    if (half_range - std::f64::consts::PI).abs() < 1e-12 {
        return angle_modulus(error);
    }
    let range = max - min;
    let wrapped = (error + half_range).rem_euclid(range) - half_range;
    if wrapped == -half_range { half_range } else { wrapped }
}

/// Shaping applied to a normalized controller output before it is scaled to
/// a physical command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseCurve {
    #[default]
    Linear,
    /// `x * |x|`: gentle near zero, full authority at the ends.
    SignedSquare,
}

impl ResponseCurve {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            ResponseCurve::Linear => x,
            ResponseCurve::SignedSquare => (x * x).copysign(x),
        }
    }
}
