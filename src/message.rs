//! Wire format for vehicle-state messages.
//!
//! Every message carries the same 59-byte vehicle record; only the protocol
//! id and hop limit differ. The envelope prepends protocol, sequence number,
//! hop limit and payload length. Multi-byte fields are little-endian.

use serde::{Deserialize, Serialize};

use crate::drive_status::DriveStatus;
use crate::error::{MonitorError, Result};
use crate::types::Accel;
use crate::vehicle::{VehicleState, PLATE_LEN};

pub const PAYLOAD_LEN: usize = 59;
pub const HEADER_LEN: usize = 8;
pub const FRAME_LEN: usize = HEADER_LEN + PAYLOAD_LEN;

/// Hop limit for urgent alerts that should be relayed
pub const URGENT_HOP_LIMIT: u8 = 5;
/// Hop limit for single-hop periodic traffic
pub const PERIODIC_HOP_LIMIT: u8 = 1;

const OFF_LAT: usize = 9;
const OFF_LON: usize = 17;
const OFF_SPEED: usize = 25;
const OFF_BEARING: usize = 29;
const OFF_ACCEL_X: usize = 33;
const OFF_ACCEL_Y: usize = 37;
const OFF_ACCEL_Z: usize = 41;
const OFF_STATUS: usize = 53;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolId {
    PeriodicBroadcast = 0x22,
    RolloverAlert = 0x24,
    BrakeAlert = 0x25,
    TurnAlert = 0x26,
    AccelerationAlert = 0x29,
    CompanionStatus = 0x56,
}

impl ProtocolId {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_urgent(self) -> bool {
        matches!(
            self,
            ProtocolId::RolloverAlert
                | ProtocolId::BrakeAlert
                | ProtocolId::TurnAlert
                | ProtocolId::AccelerationAlert
        )
    }

    pub fn hop_limit(self) -> u8 {
        if self.is_urgent() {
            URGENT_HOP_LIMIT
        } else {
            PERIODIC_HOP_LIMIT
        }
    }
}

impl TryFrom<u8> for ProtocolId {
    type Error = MonitorError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x22 => Ok(ProtocolId::PeriodicBroadcast),
            0x24 => Ok(ProtocolId::RolloverAlert),
            0x25 => Ok(ProtocolId::BrakeAlert),
            0x26 => Ok(ProtocolId::TurnAlert),
            0x29 => Ok(ProtocolId::AccelerationAlert),
            0x56 => Ok(ProtocolId::CompanionStatus),
            other => Err(MonitorError::Decode(format!(
                "unknown protocol id 0x{:02x}",
                other
            ))),
        }
    }
}

/// The fixed vehicle record carried in every payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub plate: [u8; PLATE_LEN],
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f32,
    pub bearing: f32,
    pub accel: Accel,
    pub drive_status: u32,
}

impl VehicleRecord {
    pub fn from_state(vehicle: &VehicleState, status: &DriveStatus) -> Self {
        Self {
            plate: vehicle.plate,
            latitude: vehicle.latitude,
            longitude: vehicle.longitude,
            speed: vehicle.speed,
            bearing: vehicle.bearing,
            accel: vehicle.accel,
            drive_status: status.to_bits(),
        }
    }

    pub fn encode(&self) -> [u8; PAYLOAD_LEN] {
        let mut data = [0u8; PAYLOAD_LEN];
        data[..PLATE_LEN].copy_from_slice(&self.plate);
        data[OFF_LAT..OFF_LAT + 8].copy_from_slice(&self.latitude.to_le_bytes());
        data[OFF_LON..OFF_LON + 8].copy_from_slice(&self.longitude.to_le_bytes());
        data[OFF_SPEED..OFF_SPEED + 4].copy_from_slice(&self.speed.to_le_bytes());
        data[OFF_BEARING..OFF_BEARING + 4].copy_from_slice(&self.bearing.to_le_bytes());
        data[OFF_ACCEL_X..OFF_ACCEL_X + 4].copy_from_slice(&self.accel.x.to_le_bytes());
        data[OFF_ACCEL_Y..OFF_ACCEL_Y + 4].copy_from_slice(&self.accel.y.to_le_bytes());
        data[OFF_ACCEL_Z..OFF_ACCEL_Z + 4].copy_from_slice(&self.accel.z.to_le_bytes());
        // 45..53 elevation, not populated
        data[OFF_STATUS..OFF_STATUS + 4].copy_from_slice(&self.drive_status.to_le_bytes());
        data
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < PAYLOAD_LEN {
            return Err(MonitorError::Decode(format!(
                "payload is {} bytes, expected {}",
                data.len(),
                PAYLOAD_LEN
            )));
        }
        let mut plate = [0u8; PLATE_LEN];
        plate.copy_from_slice(&data[..PLATE_LEN]);
        Ok(Self {
            plate,
            latitude: f64::from_le_bytes(array_at(data, OFF_LAT)),
            longitude: f64::from_le_bytes(array_at(data, OFF_LON)),
            speed: f32::from_le_bytes(array_at(data, OFF_SPEED)),
            bearing: f32::from_le_bytes(array_at(data, OFF_BEARING)),
            accel: Accel {
                x: f32::from_le_bytes(array_at(data, OFF_ACCEL_X)),
                y: f32::from_le_bytes(array_at(data, OFF_ACCEL_Y)),
                z: f32::from_le_bytes(array_at(data, OFF_ACCEL_Z)),
            },
            drive_status: u32::from_le_bytes(array_at(data, OFF_STATUS)),
        })
    }
}

fn array_at<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&data[offset..offset + N]);
    out
}

/// One message ready for a transport
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    pub protocol: ProtocolId,
    pub sequence: u32,
    pub hop_limit: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl OutboundMessage {
    pub fn new(protocol: ProtocolId, sequence: u32, record: &VehicleRecord) -> Self {
        Self {
            protocol,
            sequence,
            hop_limit: protocol.hop_limit(),
            payload: record.encode(),
        }
    }

    pub fn length(&self) -> u16 {
        PAYLOAD_LEN as u16
    }

    pub fn record(&self) -> Result<VehicleRecord> {
        VehicleRecord::decode(&self.payload)
    }

    /// protocol u8 | sequence u32 | hop u8 | length u16 | payload
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_LEN);
        frame.push(self.protocol.as_u8());
        frame.extend_from_slice(&self.sequence.to_le_bytes());
        frame.push(self.hop_limit);
        frame.extend_from_slice(&self.length().to_le_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        if frame.len() < HEADER_LEN {
            return Err(MonitorError::Decode(format!(
                "frame is {} bytes, shorter than the header",
                frame.len()
            )));
        }
        let protocol = ProtocolId::try_from(frame[0])?;
        let sequence = u32::from_le_bytes(array_at(frame, 1));
        let hop_limit = frame[5];
        let length = u16::from_le_bytes(array_at(frame, 6)) as usize;
        if length != PAYLOAD_LEN || frame.len() < HEADER_LEN + length {
            return Err(MonitorError::Decode(format!(
                "bad payload length {} in {}-byte frame",
                length,
                frame.len()
            )));
        }
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + PAYLOAD_LEN]);
        Ok(Self {
            protocol,
            sequence,
            hop_limit,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::{encode_plate, LocationFix};

    fn sample_state() -> VehicleState {
        let mut vehicle = VehicleState::new("B12345");
        vehicle.apply_fix(&LocationFix {
            latitude: 39.9042,
            longitude: 116.4074,
            lat_ref: 'N',
            lon_ref: 'E',
            speed: 13.5,
            bearing: 270.0,
        });
        vehicle.set_accel(Accel {
            x: 0.25,
            y: -4.5,
            z: 9.7,
        });
        vehicle
    }

    #[test]
    fn test_payload_offsets() {
        let mut status = DriveStatus::default();
        status.set_brake(3);
        let record = VehicleRecord::from_state(&sample_state(), &status);
        let data = record.encode();

        assert_eq!(&data[..9], &encode_plate("B12345"));
        assert_eq!(&data[9..17], &39.9042f64.to_le_bytes());
        assert_eq!(&data[17..25], &116.4074f64.to_le_bytes());
        assert_eq!(&data[25..29], &13.5f32.to_le_bytes());
        assert_eq!(&data[29..33], &270.0f32.to_le_bytes());
        assert_eq!(&data[37..41], &(-4.5f32).to_le_bytes());
        assert!(data[45..53].iter().all(|&b| b == 0));
        assert_eq!(&data[53..57], &status.to_bits().to_le_bytes());
        assert_eq!(&data[57..], &[0, 0]);
    }

    #[test]
    fn test_hop_limits() {
        let record = VehicleRecord::from_state(&sample_state(), &DriveStatus::default());
        assert_eq!(OutboundMessage::new(ProtocolId::BrakeAlert, 1, &record).hop_limit, 5);
        assert_eq!(OutboundMessage::new(ProtocolId::RolloverAlert, 1, &record).hop_limit, 5);
        assert_eq!(OutboundMessage::new(ProtocolId::PeriodicBroadcast, 1, &record).hop_limit, 1);
        assert_eq!(OutboundMessage::new(ProtocolId::CompanionStatus, 1, &record).hop_limit, 1);
    }

    #[test]
    fn test_frame_decodes_back() {
        let record = VehicleRecord::from_state(&sample_state(), &DriveStatus::default());
        let message = OutboundMessage::new(ProtocolId::TurnAlert, 0xDEAD_BEEF, &record);
        let frame = message.encode();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(frame[0], 0x26);

        let decoded = OutboundMessage::decode(&frame).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.record().unwrap(), record);
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert!(OutboundMessage::decode(&[0x22, 0, 0]).is_err());

        let record = VehicleRecord::from_state(&sample_state(), &DriveStatus::default());
        let mut frame = OutboundMessage::new(ProtocolId::PeriodicBroadcast, 7, &record).encode();
        frame[0] = 0x30;
        assert!(OutboundMessage::decode(&frame).is_err());

        frame[0] = 0x22;
        frame.truncate(40);
        assert!(OutboundMessage::decode(&frame).is_err());
    }
}
