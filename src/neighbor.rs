use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::message::{OutboundMessage, ProtocolId, VehicleRecord};
use crate::vehicle::{decode_plate, PLATE_LEN};

/// How the expiry sweep measures staleness
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryRule {
    /// Remove when `now - last_seen` exceeds the threshold
    #[default]
    Age,
    /// Remove when `last_seen - now` exceeds the threshold. Only fires for
    /// timestamps in the future; kept for parity with deployed nodes.
    Legacy,
}

impl ExpiryRule {
    pub fn is_stale(
        self,
        last_seen: DateTime<Utc>,
        now: DateTime<Utc>,
        threshold_secs: f64,
    ) -> bool {
        let diff = match self {
            ExpiryRule::Age => now.signed_duration_since(last_seen),
            ExpiryRule::Legacy => last_seen.signed_duration_since(now),
        };
        seconds(diff) > threshold_secs
    }
}

fn seconds(duration: chrono::Duration) -> f64 {
    duration.num_milliseconds() as f64 / 1000.0
}

/// Another vehicle heard over the air
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub plate: [u8; PLATE_LEN],
    pub record: VehicleRecord,
    pub sequence: u32,
    pub last_seen: DateTime<Utc>,
}

impl Neighbor {
    pub fn plate_str(&self) -> String {
        decode_plate(&self.plate)
    }
}

#[derive(Clone, Debug, Default)]
pub struct NeighborTable {
    entries: Vec<Neighbor>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a neighbour keyed by plate
    pub fn upsert(&mut self, record: VehicleRecord, sequence: u32, now: DateTime<Utc>) {
        if let Some(entry) = self.entries.iter_mut().find(|n| n.plate == record.plate) {
            entry.record = record;
            entry.sequence = sequence;
            entry.last_seen = now;
            return;
        }
        let neighbor = Neighbor {
            plate: record.plate,
            record,
            sequence,
            last_seen: now,
        };
        debug!("New neighbour {}", neighbor.plate_str());
        self.entries.push(neighbor);
    }

    /// Feed a received frame; anything that is not a periodic broadcast or
    /// whose payload does not parse is ignored. Returns true if accepted.
    pub fn ingest(&mut self, message: &OutboundMessage, now: DateTime<Utc>) -> bool {
        if message.protocol != ProtocolId::PeriodicBroadcast {
            return false;
        }
        match message.record() {
            Ok(record) => {
                self.upsert(record, message.sequence, now);
                true
            }
            Err(e) => {
                debug!("Ignoring neighbour frame: {}", e);
                false
            }
        }
    }

    pub fn remove(&mut self, plate: &[u8; PLATE_LEN]) -> Option<Neighbor> {
        let idx = self.entries.iter().position(|n| &n.plate == plate)?;
        Some(self.entries.remove(idx))
    }

    /// Drop stale entries, returns how many were removed
    pub fn expire(&mut self, now: DateTime<Utc>, threshold_secs: f64, rule: ExpiryRule) -> usize {
        let before = self.entries.len();
        self.entries.retain(|n| {
            let stale = rule.is_stale(n.last_seen, now, threshold_secs);
            if stale {
                info!("Neighbour {} expired", n.plate_str());
            }
            !stale
        });
        before - self.entries.len()
    }

    pub fn get(&self, plate: &[u8; PLATE_LEN]) -> Option<&Neighbor> {
        self.entries.iter().find(|n| &n.plate == plate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Neighbor> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_status::DriveStatus;
    use crate::vehicle::{encode_plate, VehicleState};
    use chrono::Duration;

    fn record(plate: &str) -> VehicleRecord {
        VehicleRecord::from_state(&VehicleState::new(plate), &DriveStatus::default())
    }

    #[test]
    fn test_expiry_at_five_seconds() {
        let now = Utc::now();
        let mut table = NeighborTable::new();
        table.upsert(record("OLD"), 1, now - Duration::milliseconds(5_100));
        table.upsert(record("FRESH"), 1, now - Duration::milliseconds(4_900));

        let removed = table.expire(now, 5.0, ExpiryRule::Age);
        assert_eq!(removed, 1);
        assert!(table.get(&encode_plate("OLD")).is_none());
        assert!(table.get(&encode_plate("FRESH")).is_some());
    }

    #[test]
    fn test_legacy_rule_keeps_past_entries() {
        let now = Utc::now();
        let mut table = NeighborTable::new();
        table.upsert(record("OLD"), 1, now - Duration::seconds(60));
        table.upsert(record("SKEWED"), 1, now + Duration::seconds(6));

        assert_eq!(table.expire(now, 5.0, ExpiryRule::Legacy), 1);
        assert!(table.get(&encode_plate("OLD")).is_some());
        assert!(table.get(&encode_plate("SKEWED")).is_none());
    }

    #[test]
    fn test_upsert_refreshes_existing_entry() {
        let start = Utc::now();
        let mut table = NeighborTable::new();
        table.upsert(record("CAR1"), 1, start);
        table.upsert(record("CAR1"), 2, start + Duration::seconds(4));
        assert_eq!(table.len(), 1);

        let entry = table.get(&encode_plate("CAR1")).unwrap();
        assert_eq!(entry.sequence, 2);
        assert_eq!(table.expire(start + Duration::seconds(8), 5.0, ExpiryRule::Age), 0);
    }

    #[test]
    fn test_ingest_only_accepts_periodic_broadcasts() {
        let now = Utc::now();
        let mut table = NeighborTable::new();
        let alert = OutboundMessage::new(ProtocolId::BrakeAlert, 4, &record("CAR2"));
        assert!(!table.ingest(&alert, now));

        let periodic = OutboundMessage::new(ProtocolId::PeriodicBroadcast, 5, &record("CAR2"));
        assert!(table.ingest(&periodic, now));
        assert_eq!(table.iter().next().map(|n| n.plate_str()), Some("CAR2".to_string()));

        assert!(table.remove(&encode_plate("CAR2")).is_some());
        assert!(table.is_empty());
    }
}
