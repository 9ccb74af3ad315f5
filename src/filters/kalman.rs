use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

/// Tuning for the single-axis tilt estimator
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanConfig {
    /// Sample interval in seconds
    pub dt: f32,
    /// Process noise on the angle
    pub q_angle: f32,
    /// Process noise on the gyro bias
    pub q_gyro: f32,
    /// Measurement noise on the accelerometer angle
    pub r_angle: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            dt: 0.05,
            q_angle: 0.001,
            q_gyro: 0.003,
            r_angle: 0.5,
        }
    }
}

/// Reference plane a filter instance estimates tilt in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    /// Fed with rotation about Y and the X/Z accel angle
    Xoz,
    /// Fed with rotation about X and the Y/Z accel angle
    Yoz,
}

/// Output of one filter step
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TiltEstimate {
    /// Filtered angle, degrees
    pub angle: f32,
    /// Gyro rate with the bias estimate removed, deg/s
    pub rate: f32,
}

/// One-dimensional angle/bias Kalman filter.
///
/// State is `[angle, gyro_bias]` with a scalar angle measurement (H = [1, 0]).
/// The arithmetic is kept in a fixed order so two runs over the same input
/// produce the same f32 sequence.
#[derive(Clone, Debug)]
pub struct TiltKalman {
    plane: Plane,
    config: KalmanConfig,
    angle: f32,
    bias: f32,
    p: Matrix2<f32>,
    updates: u64,
}

impl TiltKalman {
    pub fn new(plane: Plane, config: KalmanConfig) -> Self {
        Self {
            plane,
            config,
            angle: 0.0,
            bias: 0.0,
            p: Matrix2::identity(),
            updates: 0,
        }
    }

    /// Start the bias estimate from a calibrated gyro offset
    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = bias;
        self
    }

    /// Advance one step with a gyro rate (deg/s) and an accelerometer angle (deg)
    pub fn update(&mut self, gyro_rate: f32, measured_angle: f32) -> TiltEstimate {
        let dt = self.config.dt;

        // predict
        self.angle += (gyro_rate - self.bias) * dt;

        let pdot00 = self.config.q_angle - self.p[(0, 1)] - self.p[(1, 0)];
        let pdot01 = -self.p[(1, 1)];
        let pdot10 = -self.p[(1, 1)];
        let pdot11 = self.config.q_gyro;

        self.p[(0, 0)] += pdot00 * dt;
        self.p[(0, 1)] += pdot01 * dt;
        self.p[(1, 0)] += pdot10 * dt;
        self.p[(1, 1)] += pdot11 * dt;

        // correct
        let angle_err = measured_angle - self.angle;

        let pct0 = self.p[(0, 0)];
        let pct1 = self.p[(1, 0)];
        let e = self.config.r_angle + pct0;

        let k0 = pct0 / e;
        let k1 = pct1 / e;

        let t0 = pct0;
        let t1 = self.p[(0, 1)];

        self.p[(0, 0)] -= k0 * t0;
        self.p[(0, 1)] -= k0 * t1;
        self.p[(1, 0)] -= k1 * t0;
        self.p[(1, 1)] -= k1 * t1;

        self.angle += k0 * angle_err;
        self.bias += k1 * angle_err;
        self.updates += 1;

        TiltEstimate {
            angle: self.angle,
            rate: gyro_rate - self.bias,
        }
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    pub fn covariance(&self) -> Matrix2<f32> {
        self.p
    }

    pub fn update_count(&self) -> u64 {
        self.updates
    }
}

/// The two decoupled tilt estimators
#[derive(Clone, Debug)]
pub struct AttitudeFilter {
    pub xoz: TiltKalman,
    pub yoz: TiltKalman,
}

impl AttitudeFilter {
    /// `gyro_bias_y` seeds the XOZ plane, `gyro_bias_x` the YOZ plane
    pub fn new(config: KalmanConfig, gyro_bias_x: f32, gyro_bias_y: f32) -> Self {
        Self {
            xoz: TiltKalman::new(Plane::Xoz, config).with_bias(gyro_bias_y),
            yoz: TiltKalman::new(Plane::Yoz, config).with_bias(gyro_bias_x),
        }
    }
}
