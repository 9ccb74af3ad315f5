use std::io::ErrorKind;
use std::net::UdpSocket;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::message::{OutboundMessage, FRAME_LEN};

/// Outbound side of the node: the wireless broadcast device and the paired
/// companion device. Sends are fire-and-forget from the caller's view.
pub trait Transport {
    /// Broadcast over the air, returns the number of bytes handed to the radio
    fn broadcast_send(&mut self, message: &OutboundMessage) -> Result<usize>;

    /// Deliver to the companion device
    fn companion_send(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Current sequence number of the broadcast device
    fn sequence_number(&self) -> u32;

    /// Frames received from other nodes since the last poll
    fn poll_incoming(&mut self) -> Vec<OutboundMessage> {
        Vec::new()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Local address the socket binds to
    pub bind_addr: String,
    /// Destination for over-the-air broadcasts
    pub broadcast_addr: String,
    /// Destination for companion-device messages
    pub companion_addr: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5860".to_string(),
            broadcast_addr: "255.255.255.255:5860".to_string(),
            companion_addr: "127.0.0.1:5861".to_string(),
        }
    }
}

/// UDP stand-in for the radio and the companion link
pub struct UdpTransport {
    socket: UdpSocket,
    config: TransportConfig,
    sequence: u32,
}

impl UdpTransport {
    pub fn bind(config: TransportConfig) -> Result<Self> {
        info!("Binding UDP transport on {}", config.bind_addr);
        let socket = UdpSocket::bind(&config.bind_addr)
            .map_err(|e| MonitorError::Transport(format!("bind {}: {}", config.bind_addr, e)))?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;
        info!(
            "UDP transport ready (broadcast {}, companion {})",
            config.broadcast_addr, config.companion_addr
        );
        Ok(Self {
            socket,
            config,
            sequence: 0,
        })
    }

    fn send_to(&self, frame: &[u8], addr: &str) -> Result<usize> {
        self.socket
            .send_to(frame, addr)
            .map_err(|e| MonitorError::Transport(format!("send to {}: {}", addr, e)))
    }
}

impl Transport for UdpTransport {
    fn broadcast_send(&mut self, message: &OutboundMessage) -> Result<usize> {
        let sent = self.send_to(&message.encode(), &self.config.broadcast_addr)?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(sent)
    }

    fn companion_send(&mut self, message: &OutboundMessage) -> Result<()> {
        self.send_to(&message.encode(), &self.config.companion_addr)?;
        Ok(())
    }

    fn sequence_number(&self) -> u32 {
        self.sequence
    }

    fn poll_incoming(&mut self) -> Vec<OutboundMessage> {
        let mut received = Vec::new();
        let mut buf = [0u8; FRAME_LEN * 2];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => match OutboundMessage::decode(&buf[..len]) {
                    Ok(message) => received.push(message),
                    Err(e) => debug!("Dropping frame from {}: {}", from, e),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("UDP receive failed: {}", e);
                    break;
                }
            }
        }
        received
    }
}

/// Where a recorded message went
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Broadcast,
    Companion,
}

/// In-memory transport that keeps everything it is asked to send.
/// Used by the offline replay tool and by tests.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<(Channel, OutboundMessage)>,
    pub inbox: Vec<OutboundMessage>,
    sequence: u32,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broadcasts(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.sent
            .iter()
            .filter(|(channel, _)| *channel == Channel::Broadcast)
            .map(|(_, message)| message)
    }

    pub fn companion(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.sent
            .iter()
            .filter(|(channel, _)| *channel == Channel::Companion)
            .map(|(_, message)| message)
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Transport for RecordingTransport {
    fn broadcast_send(&mut self, message: &OutboundMessage) -> Result<usize> {
        self.sent.push((Channel::Broadcast, message.clone()));
        self.sequence = self.sequence.wrapping_add(1);
        Ok(message.encode().len())
    }

    fn companion_send(&mut self, message: &OutboundMessage) -> Result<()> {
        self.sent.push((Channel::Companion, message.clone()));
        Ok(())
    }

    fn sequence_number(&self) -> u32 {
        self.sequence
    }

    fn poll_incoming(&mut self) -> Vec<OutboundMessage> {
        std::mem::take(&mut self.inbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive_status::DriveStatus;
    use crate::message::{ProtocolId, VehicleRecord};
    use crate::vehicle::VehicleState;

    fn message(protocol: ProtocolId, sequence: u32) -> OutboundMessage {
        let record =
            VehicleRecord::from_state(&VehicleState::new("UDP01"), &DriveStatus::default());
        OutboundMessage::new(protocol, sequence, &record)
    }

    #[test]
    fn test_recording_transport_sequence() {
        let mut transport = RecordingTransport::new();
        assert_eq!(transport.sequence_number(), 0);
        transport
            .broadcast_send(&message(ProtocolId::PeriodicBroadcast, 0))
            .unwrap();
        transport
            .companion_send(&message(ProtocolId::CompanionStatus, 1))
            .unwrap();
        // companion traffic does not consume radio sequence numbers
        assert_eq!(transport.sequence_number(), 1);
        assert_eq!(transport.broadcasts().count(), 1);
        assert_eq!(transport.companion().count(), 1);
    }

    #[test]
    fn test_udp_loopback() {
        let receiver = UdpTransport::bind(TransportConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            broadcast_addr: "127.0.0.1:9".to_string(),
            companion_addr: "127.0.0.1:9".to_string(),
        })
        .unwrap();
        let target = receiver.socket.local_addr().unwrap().to_string();
        let mut receiver = receiver;

        let mut sender = UdpTransport::bind(TransportConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            broadcast_addr: target.clone(),
            companion_addr: target,
        })
        .unwrap();

        let sent = sender
            .broadcast_send(&message(ProtocolId::PeriodicBroadcast, 3))
            .unwrap();
        assert_eq!(sent, FRAME_LEN);
        assert_eq!(sender.sequence_number(), 1);

        let mut received = Vec::new();
        for _ in 0..50 {
            received.extend(receiver.poll_incoming());
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].protocol, ProtocolId::PeriodicBroadcast);
        assert_eq!(received[0].sequence, 3);
    }
}
