use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::thread;
use std::time::Duration;

use flate2::read::GzDecoder;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::SensorKind;
use crate::error::{MonitorError, Result};
use crate::types::{CalibrationBias, RawSample, GYRO_SCALE};

/// Samples averaged for the startup gyro bias
pub const CALIBRATION_SAMPLES: usize = 100;

/// Attempts per register access before giving up on it
pub const REGISTER_RETRIES: usize = 5;

/// Contract for the inertial sensor feeding the sampling task
pub trait SensorSource {
    /// Open and configure the device
    fn initialize(&mut self) -> Result<()>;

    /// One raw snapshot. Fields that could not be read come back as zero.
    fn read_raw(&mut self) -> RawSample;

    /// Average gyro zero-rate offsets over [`CALIBRATION_SAMPLES`] reads
    fn calibrate(&mut self) -> CalibrationBias {
        let samples: Vec<RawSample> = (0..CALIBRATION_SAMPLES).map(|_| self.read_raw()).collect();
        average_gyro_bias(&samples)
    }

    /// Power down and release the device
    fn shutdown(&mut self);
}

/// Mean gyro reading of a batch, converted to deg/s
pub fn average_gyro_bias(samples: &[RawSample]) -> CalibrationBias {
    if samples.is_empty() {
        return CalibrationBias::default();
    }
    let n = samples.len() as i64;
    let (sx, sy, sz) = samples.iter().fold((0i64, 0i64, 0i64), |acc, s| {
        (
            acc.0 + s.gyro_x as i64,
            acc.1 + s.gyro_y as i64,
            acc.2 + s.gyro_z as i64,
        )
    });
    CalibrationBias::new(
        GYRO_SCALE * (sx / n) as f32,
        GYRO_SCALE * (sy / n) as f32,
        GYRO_SCALE * (sz / n) as f32,
    )
}

/// Build the sample source a config names
pub fn open_sensor(kind: &SensorKind) -> Result<Box<dyn SensorSource>> {
    match kind {
        SensorKind::Simulated => Ok(Box::new(SimulatedSensor::new())),
        SensorKind::Replay { path } => Ok(Box::new(ReplaySensor::open(path)?)),
    }
}

// ===== MPU-6050 over a register bus =====

pub const MPU6050_ADDRESS: u8 = 0x68;

pub const SMPLRT_DIV: u8 = 0x19;
pub const CONFIG: u8 = 0x1A;
pub const GYRO_CONFIG: u8 = 0x1B;
pub const ACCEL_CONFIG: u8 = 0x1C;
pub const ACCEL_XOUT_H: u8 = 0x3B;
pub const ACCEL_YOUT_H: u8 = 0x3D;
pub const ACCEL_ZOUT_H: u8 = 0x3F;
pub const GYRO_XOUT_H: u8 = 0x43;
pub const GYRO_YOUT_H: u8 = 0x45;
pub const GYRO_ZOUT_H: u8 = 0x47;
pub const PWR_MGMT_1: u8 = 0x6B;

/// Wake up, 125 Hz sample rate, 5 Hz low-pass, ±2000 deg/s, ±2 g
const INIT_SEQUENCE: [(u8, u8); 5] = [
    (PWR_MGMT_1, 0x00),
    (SMPLRT_DIV, 0x07),
    (CONFIG, 0x06),
    (GYRO_CONFIG, 0x18),
    (ACCEL_CONFIG, 0x00),
];

/// Byte-register access to one device on a bus
pub trait RegisterBus {
    /// Open the bus and select the slave address
    fn open(&mut self, address: u8) -> std::io::Result<()>;
    fn write_register(&mut self, reg: u8, value: u8) -> std::io::Result<()>;
    fn read_register(&mut self, reg: u8) -> std::io::Result<u8>;
    fn close(&mut self);
}

pub struct Mpu6050<B: RegisterBus> {
    bus: B,
    address: u8,
    write_backoff: Duration,
    open: bool,
    failed_reads: u64,
}

impl<B: RegisterBus> Mpu6050<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            address: MPU6050_ADDRESS,
            write_backoff: Duration::from_millis(10),
            open: false,
            failed_reads: 0,
        }
    }

    pub fn with_write_backoff(mut self, backoff: Duration) -> Self {
        self.write_backoff = backoff;
        self
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Register reads that exhausted their retries since start
    pub fn failed_reads(&self) -> u64 {
        self.failed_reads
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn write_retrying(&mut self, reg: u8, value: u8) -> bool {
        for attempt in 1..=REGISTER_RETRIES {
            match self.bus.write_register(reg, value) {
                Ok(()) => return true,
                Err(e) => {
                    debug!("write 0x{:02x} attempt {} failed: {}", reg, attempt, e);
                    if attempt < REGISTER_RETRIES && !self.write_backoff.is_zero() {
                        thread::sleep(self.write_backoff);
                    }
                }
            }
        }
        false
    }

    fn read_retrying(&mut self, reg: u8) -> u8 {
        for _ in 0..REGISTER_RETRIES {
            if let Ok(value) = self.bus.read_register(reg) {
                return value;
            }
        }
        self.failed_reads += 1;
        0
    }

    fn read_word(&mut self, reg_high: u8) -> i16 {
        let high = self.read_retrying(reg_high);
        let low = self.read_retrying(reg_high + 1);
        i16::from_be_bytes([high, low])
    }
}

impl<B: RegisterBus> SensorSource for Mpu6050<B> {
    fn initialize(&mut self) -> Result<()> {
        self.bus.open(self.address).map_err(|e| {
            MonitorError::Hardware(format!(
                "cannot open sensor at 0x{:02x}: {}",
                self.address, e
            ))
        })?;
        self.open = true;
        info!("MPU-6050 opened at 0x{:02x}", self.address);

        for (reg, value) in INIT_SEQUENCE {
            if !self.write_retrying(reg, value) {
                warn!("MPU-6050 register 0x{:02x} not configured", reg);
            }
        }
        Ok(())
    }

    fn read_raw(&mut self) -> RawSample {
        RawSample {
            accel_x: self.read_word(ACCEL_XOUT_H),
            accel_y: self.read_word(ACCEL_YOUT_H),
            accel_z: self.read_word(ACCEL_ZOUT_H),
            gyro_x: self.read_word(GYRO_XOUT_H),
            gyro_y: self.read_word(GYRO_YOUT_H),
            gyro_z: self.read_word(GYRO_ZOUT_H),
        }
    }

    fn shutdown(&mut self) {
        if self.open {
            self.bus.close();
            self.open = false;
            info!("MPU-6050 closed");
        }
    }
}

// ===== Simulated sensor =====

/// Synthetic upright node with a gentle sway, for running without hardware
pub struct SimulatedSensor {
    tick: u64,
    initialized: bool,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            tick: 0,
            initialized: false,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedSensor {
    fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        info!("Simulated sensor started");
        Ok(())
    }

    fn read_raw(&mut self) -> RawSample {
        use std::f64::consts::PI;
        let t = self.tick as f64 * 0.1;
        self.tick += 1;

        RawSample {
            gyro_x: (8.0 + (t * 0.5).sin() * 6.0) as i16,
            gyro_y: (-5.0 + (t * 0.3).cos() * 6.0) as i16,
            gyro_z: (3.0 + (t * 2.0 * PI * 0.05).sin() * 40.0) as i16,
            accel_x: ((t * 2.0 * PI * 0.2).sin() * 300.0) as i16,
            accel_y: ((t * 2.0 * PI * 0.1).cos() * 500.0) as i16,
            accel_z: (16384.0 + (t * PI).sin() * 120.0) as i16,
        }
    }

    fn shutdown(&mut self) {
        self.initialized = false;
        info!("Simulated sensor stopped after {} samples", self.tick);
    }
}

// ===== Replay from a recording =====

/// Recorded raw samples, optionally with the bias measured at record time
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Recording {
    #[serde(default)]
    pub bias: Option<CalibrationBias>,
    pub samples: Vec<RawSample>,
}

impl Recording {
    /// Load a `.json` or gzip-compressed `.json.gz` recording
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if path.extension().map(|e| e == "gz").unwrap_or(false) {
            Ok(serde_json::from_reader(BufReader::new(GzDecoder::new(file)))?)
        } else {
            Ok(serde_json::from_reader(BufReader::new(file))?)
        }
    }

    /// Stored bias, or the mean of the leading samples
    pub fn bias(&self) -> CalibrationBias {
        self.bias.unwrap_or_else(|| {
            let n = self.samples.len().min(CALIBRATION_SAMPLES);
            average_gyro_bias(&self.samples[..n])
        })
    }
}

/// Plays a recording back one sample per read; holds the last sample at the end
pub struct ReplaySensor {
    recording: Recording,
    cursor: usize,
}

impl ReplaySensor {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            cursor: 0,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Recording::load(path)?))
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.recording.samples.len()
    }
}

impl SensorSource for ReplaySensor {
    fn initialize(&mut self) -> Result<()> {
        if self.recording.samples.is_empty() {
            return Err(MonitorError::Hardware("recording has no samples".to_string()));
        }
        info!("Replaying {} samples", self.recording.samples.len());
        Ok(())
    }

    fn read_raw(&mut self) -> RawSample {
        let samples = &self.recording.samples;
        let idx = self.cursor.min(samples.len().saturating_sub(1));
        if self.cursor < samples.len() {
            self.cursor += 1;
        }
        samples.get(idx).copied().unwrap_or_default()
    }

    fn calibrate(&mut self) -> CalibrationBias {
        self.recording.bias()
    }

    fn shutdown(&mut self) {
        debug!("Replay stopped at sample {}", self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::{Error, ErrorKind};

    /// Register file with a configurable number of failures per access
    #[derive(Default)]
    struct MockBus {
        registers: HashMap<u8, u8>,
        writes: Vec<(u8, u8)>,
        fail_open: bool,
        failures_left: HashMap<u8, usize>,
        opened: bool,
    }

    impl RegisterBus for MockBus {
        fn open(&mut self, _address: u8) -> std::io::Result<()> {
            if self.fail_open {
                return Err(Error::new(ErrorKind::NotFound, "no such device"));
            }
            self.opened = true;
            Ok(())
        }

        fn write_register(&mut self, reg: u8, value: u8) -> std::io::Result<()> {
            self.writes.push((reg, value));
            self.registers.insert(reg, value);
            Ok(())
        }

        fn read_register(&mut self, reg: u8) -> std::io::Result<u8> {
            if let Some(left) = self.failures_left.get_mut(&reg) {
                if *left > 0 {
                    *left -= 1;
                    return Err(Error::new(ErrorKind::TimedOut, "nack"));
                }
            }
            Ok(*self.registers.get(&reg).unwrap_or(&0))
        }

        fn close(&mut self) {
            self.opened = false;
        }
    }

    #[test]
    fn test_init_writes_configuration() {
        let mut sensor = Mpu6050::new(MockBus::default()).with_write_backoff(Duration::ZERO);
        sensor.initialize().unwrap();
        assert!(sensor.is_open());
        assert_eq!(sensor.bus().writes, INIT_SEQUENCE.to_vec());

        sensor.shutdown();
        assert!(!sensor.bus().opened);
    }

    #[test]
    fn test_open_failure_is_hardware_error() {
        let bus = MockBus {
            fail_open: true,
            ..Default::default()
        };
        let mut sensor = Mpu6050::new(bus);
        assert!(matches!(sensor.initialize(), Err(MonitorError::Hardware(_))));
        assert!(!sensor.is_open());
    }

    #[test]
    fn test_words_are_big_endian() {
        let mut bus = MockBus::default();
        bus.registers.insert(ACCEL_ZOUT_H, 0x40);
        bus.registers.insert(ACCEL_ZOUT_H + 1, 0x00);
        bus.registers.insert(GYRO_XOUT_H, 0xFF);
        bus.registers.insert(GYRO_XOUT_H + 1, 0xFE);
        let mut sensor = Mpu6050::new(bus);

        let sample = sensor.read_raw();
        assert_eq!(sample.accel_z, 16384);
        assert_eq!(sample.gyro_x, -2);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let mut bus = MockBus::default();
        bus.registers.insert(GYRO_ZOUT_H + 1, 0x10);
        bus.failures_left.insert(GYRO_ZOUT_H + 1, REGISTER_RETRIES - 1);
        let mut sensor = Mpu6050::new(bus);

        assert_eq!(sensor.read_raw().gyro_z, 0x10);
        assert_eq!(sensor.failed_reads(), 0);
    }

    #[test]
    fn test_persistent_failure_reads_zero() {
        let mut bus = MockBus::default();
        bus.registers.insert(ACCEL_YOUT_H, 0x12);
        bus.registers.insert(ACCEL_YOUT_H + 1, 0x34);
        bus.failures_left.insert(ACCEL_YOUT_H, REGISTER_RETRIES);
        let mut sensor = Mpu6050::new(bus);

        assert_eq!(sensor.read_raw().accel_y, 0x0034);
        assert_eq!(sensor.failed_reads(), 1);
    }

    #[test]
    fn test_calibration_averages_gyro() {
        let samples: Vec<RawSample> = (0..100)
            .map(|i| RawSample {
                gyro_x: 160 + (i % 2) * 2,
                gyro_y: -16,
                gyro_z: 0,
                ..Default::default()
            })
            .collect();
        let bias = average_gyro_bias(&samples);
        assert!((bias.x() - GYRO_SCALE * 161.0).abs() < 1e-6);
        assert!((bias.y() - GYRO_SCALE * -16.0).abs() < 1e-6);
        assert_eq!(bias.z(), 0.0);
    }

    #[test]
    fn test_replay_holds_last_sample() {
        let recording = Recording {
            bias: None,
            samples: vec![
                RawSample {
                    accel_y: 1,
                    ..Default::default()
                },
                RawSample {
                    accel_y: 2,
                    ..Default::default()
                },
            ],
        };
        let mut sensor = ReplaySensor::new(recording);
        sensor.initialize().unwrap();
        assert_eq!(sensor.read_raw().accel_y, 1);
        assert_eq!(sensor.read_raw().accel_y, 2);
        assert!(sensor.is_exhausted());
        assert_eq!(sensor.read_raw().accel_y, 2);
    }

    #[test]
    fn test_gzip_recording_loads() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let recording = Recording {
            bias: Some(CalibrationBias::new(0.5, -0.25, 0.0)),
            samples: vec![RawSample::default(); 3],
        };
        let path = std::env::temp_dir().join(format!("v2x_replay_{}.json.gz", std::process::id()));
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(serde_json::to_string(&recording).unwrap().as_bytes())
            .unwrap();
        encoder.finish().unwrap();

        let mut sensor = open_sensor(&SensorKind::Replay { path: path.clone() }).unwrap();
        sensor.initialize().unwrap();
        assert_eq!(sensor.calibrate(), CalibrationBias::new(0.5, -0.25, 0.0));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_empty_replay_fails_to_start() {
        let mut sensor = ReplaySensor::new(Recording::default());
        assert!(sensor.initialize().is_err());
    }

    #[test]
    fn test_simulated_sensor_is_upright() {
        let mut sensor = SimulatedSensor::new();
        sensor.initialize().unwrap();
        let sample = sensor.read_raw().to_physical();
        let angle = sample.accel_z.atan2(sample.accel_x).to_degrees();
        assert!((angle - 90.0).abs() < 5.0);
    }
}
