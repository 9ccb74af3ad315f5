use log::{info, warn};

use crate::classifier::EventRanks;
use crate::drive_status::DriveStatus;
use crate::message::{OutboundMessage, ProtocolId, VehicleRecord};
use crate::transport::Transport;
use crate::vehicle::VehicleState;

pub const BRAKE_ALERT_RANK: u8 = 3;
pub const TURN_ALERT_RANK: u8 = 3;
pub const ROLLOVER_ALERT_RANK: u8 = 2;
pub const SPEEDUP_ALERT_RANK: u8 = 3;

/// Urgent alerts plus the per-cycle companion status.
///
/// Categories are written into the register one at a time in the order
/// brake, turn, rollover, speed-up, and each alert is judged and sent right
/// after its own category lands. An alert payload therefore carries the
/// categories already updated this cycle and the previous cycle's values for
/// the rest.
#[derive(Debug, Default)]
pub struct AlertDispatcher {
    alerts_sent: u64,
    send_failures: u64,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one cycle's ranks to `status` and emit whatever they call for.
    /// Returns the urgent protocols that went out. Transport failures are
    /// logged and never stop the cycle.
    pub fn dispatch(
        &mut self,
        transport: &mut dyn Transport,
        vehicle: &VehicleState,
        status: &mut DriveStatus,
        ranks: &EventRanks,
    ) -> Vec<ProtocolId> {
        let mut emitted = Vec::new();

        status.set_brake(ranks.brake);
        if status.brake_rank >= BRAKE_ALERT_RANK {
            self.send_urgent(transport, ProtocolId::BrakeAlert, vehicle, status, &mut emitted);
        }

        status.set_turn(ranks.turn);
        if status.turn.severity >= TURN_ALERT_RANK {
            self.send_urgent(transport, ProtocolId::TurnAlert, vehicle, status, &mut emitted);
        }

        status.set_rollover(ranks.rollover);
        if status.rollover_rank >= ROLLOVER_ALERT_RANK {
            self.send_urgent(transport, ProtocolId::RolloverAlert, vehicle, status, &mut emitted);
        }

        status.set_speedup(ranks.speedup);
        if status.speedup_rank >= SPEEDUP_ALERT_RANK {
            self.send_urgent(
                transport,
                ProtocolId::AccelerationAlert,
                vehicle,
                status,
                &mut emitted,
            );
        }

        let record = VehicleRecord::from_state(vehicle, status);
        let message = OutboundMessage::new(
            ProtocolId::CompanionStatus,
            transport.sequence_number(),
            &record,
        );
        if let Err(e) = transport.companion_send(&message) {
            self.send_failures += 1;
            warn!("Companion status not delivered: {}", e);
        }

        emitted
    }

    fn send_urgent(
        &mut self,
        transport: &mut dyn Transport,
        protocol: ProtocolId,
        vehicle: &VehicleState,
        status: &DriveStatus,
        emitted: &mut Vec<ProtocolId>,
    ) {
        let record = VehicleRecord::from_state(vehicle, status);
        let message = OutboundMessage::new(protocol, transport.sequence_number(), &record);
        match transport.broadcast_send(&message) {
            Ok(bytes) => {
                self.alerts_sent += 1;
                info!(
                    "Alert 0x{:02x} sent ({} bytes, status 0x{:08x})",
                    protocol.as_u8(),
                    bytes,
                    record.drive_status
                );
                emitted.push(protocol);
            }
            Err(e) => {
                self.send_failures += 1;
                warn!("Alert 0x{:02x} not sent: {}", protocol.as_u8(), e);
            }
        }
    }

    pub fn alerts_sent(&self) -> u64 {
        self.alerts_sent
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{TurnDirection, TurnRank};
    use crate::drive_status::{BRAKE_RANK_MASK, IS_BRAKE, TURN_RANK_MASK};
    use crate::error::{MonitorError, Result};
    use crate::message::URGENT_HOP_LIMIT;
    use crate::transport::RecordingTransport;

    struct FailingTransport {
        companion_sends: usize,
    }

    impl Transport for FailingTransport {
        fn broadcast_send(&mut self, _message: &OutboundMessage) -> Result<usize> {
            Err(MonitorError::Transport("radio down".to_string()))
        }

        fn companion_send(&mut self, _message: &OutboundMessage) -> Result<()> {
            self.companion_sends += 1;
            Ok(())
        }

        fn sequence_number(&self) -> u32 {
            0
        }
    }

    fn brake_ranks(brake: u8) -> EventRanks {
        EventRanks {
            brake,
            ..Default::default()
        }
    }

    #[test]
    fn test_brake_alert_only_from_rank_three() {
        let vehicle = VehicleState::new("ALERT1");
        let mut dispatcher = AlertDispatcher::new();
        let mut transport = RecordingTransport::new();
        let mut status = DriveStatus::default();

        let emitted: Vec<bool> = [0u8, 1, 2, 3]
            .iter()
            .map(|&rank| {
                let ranks = brake_ranks(rank);
                let sent = dispatcher.dispatch(&mut transport, &vehicle, &mut status, &ranks);
                sent.contains(&ProtocolId::BrakeAlert)
            })
            .collect();
        assert_eq!(emitted, vec![false, false, false, true]);

        let alert = transport.broadcasts().next().unwrap();
        assert_eq!(alert.protocol, ProtocolId::BrakeAlert);
        assert_eq!(alert.hop_limit, URGENT_HOP_LIMIT);
        let bits = alert.record().unwrap().drive_status;
        assert_eq!(bits & BRAKE_RANK_MASK, 0x0C00);
        assert_ne!(bits & IS_BRAKE, 0);

        // one companion status per cycle regardless of alerts
        assert_eq!(transport.companion().count(), 4);
        assert!(transport
            .companion()
            .all(|m| m.protocol == ProtocolId::CompanionStatus && m.hop_limit == 1));
    }

    #[test]
    fn test_alert_thresholds_per_category() {
        let vehicle = VehicleState::new("ALERT2");
        let mut dispatcher = AlertDispatcher::new();
        let mut transport = RecordingTransport::new();
        let mut status = DriveStatus::default();

        let below = EventRanks {
            brake: 2,
            speedup: 2,
            turn: TurnRank::new(TurnDirection::Left, 2),
            rollover: 1,
        };
        assert!(dispatcher.dispatch(&mut transport, &vehicle, &mut status, &below).is_empty());

        let above = EventRanks {
            brake: 4,
            speedup: 3,
            turn: TurnRank::new(TurnDirection::Right, 3),
            rollover: 2,
        };
        let emitted = dispatcher.dispatch(&mut transport, &vehicle, &mut status, &above);
        assert_eq!(
            emitted,
            vec![
                ProtocolId::BrakeAlert,
                ProtocolId::TurnAlert,
                ProtocolId::RolloverAlert,
                ProtocolId::AccelerationAlert,
            ]
        );
        assert_eq!(dispatcher.alerts_sent(), 4);
    }

    #[test]
    fn test_alert_payload_sees_categories_in_order() {
        let vehicle = VehicleState::new("ALERT3");
        let mut dispatcher = AlertDispatcher::new();
        let mut transport = RecordingTransport::new();
        let mut status = DriveStatus::default();

        let turning = EventRanks {
            turn: TurnRank::new(TurnDirection::Left, 2),
            ..Default::default()
        };
        dispatcher.dispatch(&mut transport, &vehicle, &mut status, &turning);

        // brake fires before the turn category is rewritten
        let braking = EventRanks {
            brake: 4,
            ..Default::default()
        };
        dispatcher.dispatch(&mut transport, &vehicle, &mut status, &braking);
        let alert = transport.broadcasts().next().unwrap();
        let bits = alert.record().unwrap().drive_status;
        assert_eq!((bits & TURN_RANK_MASK) >> 13, 2);

        // the companion status reflects the finished cycle
        let last = transport.companion().last().unwrap();
        assert_eq!(last.record().unwrap().drive_status & TURN_RANK_MASK, 0);
    }

    #[test]
    fn test_sequence_number_taken_from_transport() {
        let vehicle = VehicleState::new("ALERT4");
        let mut dispatcher = AlertDispatcher::new();
        let mut transport = RecordingTransport::new();
        let mut status = DriveStatus::default();

        for _ in 0..3 {
            dispatcher.dispatch(&mut transport, &vehicle, &mut status, &brake_ranks(4));
        }
        let sequences: Vec<u32> = transport.broadcasts().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_send_failure_does_not_stop_cycle() {
        let vehicle = VehicleState::new("ALERT5");
        let mut dispatcher = AlertDispatcher::new();
        let mut transport = FailingTransport { companion_sends: 0 };
        let mut status = DriveStatus::default();

        let emitted = dispatcher.dispatch(&mut transport, &vehicle, &mut status, &brake_ranks(4));
        assert!(emitted.is_empty());
        assert_eq!(dispatcher.send_failures(), 1);
        assert_eq!(transport.companion_sends, 1);
        assert_eq!(status.brake_rank, 4);
    }
}
