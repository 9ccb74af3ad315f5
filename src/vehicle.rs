use serde::{Deserialize, Serialize};

use crate::drive_status::LocationFlags;
use crate::types::Accel;

/// Length of the plate field on the wire
pub const PLATE_LEN: usize = 9;

/// Hemisphere reference before the first fix
pub const NO_REF: char = '\0';

/// A position report from the vehicle's GPS
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    /// NMEA latitude reference, 'N' or 'S'
    pub lat_ref: char,
    /// NMEA longitude reference, 'E' or 'W'
    pub lon_ref: char,
    /// m/s
    pub speed: f32,
    /// degrees from north
    pub bearing: f32,
}

/// Own-vehicle state shared between the sampling and broadcast tasks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub plate: [u8; PLATE_LEN],
    pub valid: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub lat_ref: char,
    pub lon_ref: char,
    pub speed: f32,
    pub bearing: f32,
    /// Latest gravity-compensated acceleration from the sampling task
    pub accel: Accel,
}

impl VehicleState {
    /// Plates longer than the wire field are truncated, shorter ones zero padded
    pub fn new(plate: &str) -> Self {
        Self {
            plate: encode_plate(plate),
            valid: false,
            latitude: 0.0,
            longitude: 0.0,
            lat_ref: NO_REF,
            lon_ref: NO_REF,
            speed: 0.0,
            bearing: 0.0,
            accel: Accel::default(),
        }
    }

    pub fn apply_fix(&mut self, fix: &LocationFix) {
        self.latitude = fix.latitude;
        self.longitude = fix.longitude;
        self.lat_ref = fix.lat_ref;
        self.lon_ref = fix.lon_ref;
        self.speed = fix.speed;
        self.bearing = fix.bearing;
        self.valid = true;
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn set_accel(&mut self, accel: Accel) {
        self.accel = accel;
    }

    pub fn location_flags(&self) -> LocationFlags {
        LocationFlags {
            located: self.valid,
            north: self.lat_ref == 'N',
            east: self.lon_ref == 'E',
        }
    }

    pub fn plate_str(&self) -> String {
        decode_plate(&self.plate)
    }
}

pub fn encode_plate(plate: &str) -> [u8; PLATE_LEN] {
    let mut out = [0u8; PLATE_LEN];
    for (slot, byte) in out.iter_mut().zip(plate.as_bytes()) {
        *slot = *byte;
    }
    out
}

pub fn decode_plate(bytes: &[u8; PLATE_LEN]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(PLATE_LEN);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plate_padding_and_truncation() {
        assert_eq!(decode_plate(&encode_plate("ABC123")), "ABC123");
        assert_eq!(decode_plate(&encode_plate("ABCDEFGHIJKL")), "ABCDEFGHI");
    }

    #[test]
    fn test_no_hemisphere_bits_before_fix() {
        let vehicle = VehicleState::new("NOFIX");
        assert_eq!(vehicle.location_flags(), LocationFlags::default());
    }

    #[test]
    fn test_fix_sets_hemisphere_flags() {
        let mut vehicle = VehicleState::new("TEST01");
        assert!(!vehicle.location_flags().located);

        vehicle.apply_fix(&LocationFix {
            latitude: 33.9,
            longitude: 151.2,
            lat_ref: 'S',
            lon_ref: 'E',
            speed: 12.0,
            bearing: 45.0,
        });
        let flags = vehicle.location_flags();
        assert!(flags.located);
        assert!(!flags.north);
        assert!(flags.east);

        vehicle.invalidate();
        assert!(!vehicle.location_flags().located);
    }
}
