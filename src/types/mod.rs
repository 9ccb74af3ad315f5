use serde::{Deserialize, Serialize};

/// Local gravity used by the accelerometer scale, m/s²
pub const GRAVITY: f32 = 9.78833;

/// Degrees per radian as used throughout the tilt math
pub const DEG_PER_RAD: f32 = 57.3;

/// Gyro full scale (±2000 deg/s) over the signed 15-bit range
pub const GYRO_SCALE: f32 = 2000.0 / 32768.0;

/// Accel full scale (±2 g) over the signed 15-bit range
pub const ACCEL_SCALE: f32 = 2.0 * GRAVITY / 32768.0;

/// One raw register snapshot from the inertial sensor
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub accel_x: i16,
    pub accel_y: i16,
    pub accel_z: i16,
}

impl RawSample {
    /// Convert register counts into deg/s and m/s²
    pub fn to_physical(&self) -> ImuReading {
        ImuReading {
            gyro_x: GYRO_SCALE * self.gyro_x as f32,
            gyro_y: GYRO_SCALE * self.gyro_y as f32,
            gyro_z: GYRO_SCALE * self.gyro_z as f32,
            accel_x: ACCEL_SCALE * self.accel_x as f32,
            accel_y: ACCEL_SCALE * self.accel_y as f32,
            accel_z: ACCEL_SCALE * self.accel_z as f32,
        }
    }
}

/// Sample in physical units: gyro in deg/s, accel in m/s²
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuReading {
    pub gyro_x: f32,
    pub gyro_y: f32,
    pub gyro_z: f32,
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
}

/// Gyro zero-rate offsets in deg/s, measured once at startup
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBias {
    pub q_bias: [f32; 3],
}

impl CalibrationBias {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { q_bias: [x, y, z] }
    }

    pub fn x(&self) -> f32 {
        self.q_bias[0]
    }

    pub fn y(&self) -> f32 {
        self.q_bias[1]
    }

    pub fn z(&self) -> f32 {
        self.q_bias[2]
    }
}

/// Accelerations reported on the wire, m/s²
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Accel {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}
