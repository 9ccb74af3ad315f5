// pipeline.rs: pure per-cycle computation for the monitor
//
// Independent of timers, transports and the sensor device: a raw register
// snapshot goes in, filtered tilt, gravity-compensated acceleration and event
// ranks come out. The sampling task and the offline replay tool both drive it.

use serde::Serialize;

use crate::classifier::{ClassifierConfig, DynamicsSignals, EventClassifier, EventRanks};
use crate::filters::{AttitudeFilter, KalmanConfig, TiltEstimate};
use crate::types::{Accel, CalibrationBias, ImuReading, RawSample, DEG_PER_RAD, GRAVITY};

/// Everything one sampling cycle produced
#[derive(Clone, Copy, Debug, Serialize)]
pub struct CycleOutput {
    /// Cycles processed since the pipeline was built, this one included
    pub cycle: u64,
    pub reading: ImuReading,
    pub xoz: TiltEstimate,
    pub yoz: TiltEstimate,
    /// Acceleration with the gravity leak removed from the longitudinal axis
    pub accel: Accel,
    pub signals: DynamicsSignals,
    pub ranks: EventRanks,
}

pub struct MonitorPipeline {
    filter: AttitudeFilter,
    classifier: EventClassifier,
    bias: CalibrationBias,
    cycles: u64,
}

impl MonitorPipeline {
    pub fn new(kalman: KalmanConfig, classifier: ClassifierConfig, bias: CalibrationBias) -> Self {
        Self {
            filter: AttitudeFilter::new(kalman, bias.x(), bias.y()),
            classifier: EventClassifier::new(classifier),
            bias,
            cycles: 0,
        }
    }

    pub fn process(&mut self, raw: &RawSample) -> CycleOutput {
        let reading = raw.to_physical();

        let measured_xoz = reading.accel_z.atan2(reading.accel_x) * DEG_PER_RAD;
        let measured_yoz = reading.accel_z.atan2(reading.accel_y) * DEG_PER_RAD;

        let xoz = self.filter.xoz.update(reading.gyro_y, measured_xoz);
        let yoz = self.filter.yoz.update(reading.gyro_x, measured_yoz);

        let accel = Accel {
            x: reading.accel_x,
            y: compensate_gravity(reading.accel_y, measured_yoz),
            z: reading.accel_z,
        };

        let signals = DynamicsSignals {
            longitudinal_accel: accel.y,
            yaw_rate: (reading.gyro_z - self.bias.z()) / DEG_PER_RAD,
            tilt_angle: xoz.angle,
        };
        let ranks = self.classifier.classify(&signals);
        self.cycles += 1;

        CycleOutput {
            cycle: self.cycles,
            reading,
            xoz,
            yoz,
            accel,
            signals,
            ranks,
        }
    }

    pub fn bias(&self) -> CalibrationBias {
        self.bias
    }

    pub fn filter(&self) -> &AttitudeFilter {
        &self.filter
    }

    pub fn classifier(&self) -> &EventClassifier {
        &self.classifier
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

/// Remove the share of gravity that leaks into the longitudinal axis when
/// the node is pitched away from upright (YOZ angle of ±90°). Takes the
/// accelerometer angle of the same sample, not the filtered one.
pub fn compensate_gravity(accel_y: f32, yoz_angle: f32) -> f32 {
    let leak = GRAVITY * ((yoz_angle.abs() - 90.0).abs() / DEG_PER_RAD).sin();
    if yoz_angle.abs() >= 90.0 {
        accel_y - leak
    } else {
        accel_y + leak
    }
}

/// Raw accel count for a value in m/s²
#[cfg(test)]
pub(crate) fn accel_counts(value: f32) -> i16 {
    (value / crate::types::ACCEL_SCALE).round() as i16
}

/// Upright, motionless node: gravity entirely on Z
#[cfg(test)]
pub(crate) fn upright_sample() -> RawSample {
    RawSample {
        accel_z: 16384,
        ..Default::default()
    }
}

/// Longitudinal ramp 0 → 4.5 m/s² over eight cycles
#[cfg(test)]
pub(crate) const HARD_BRAKE_RAMP: [f32; 8] = [0.0, 0.3, 0.55, 0.65, 0.8, 1.0, 1.5, 4.5];
