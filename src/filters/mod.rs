pub mod kalman;

pub use kalman::{AttitudeFilter, KalmanConfig, Plane, TiltEstimate, TiltKalman};
