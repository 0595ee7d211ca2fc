//! Addressed bus endpoint used by the game logic.
//!
//! A [`NodeSession`] ties the transport, the backoff arbiter and the delivery
//! manager together behind the operations the game logic calls: the per-tick
//! [`NodeSession::poll`] and the fire-and-forget event reports
//! ([`NodeSession::strike`], [`NodeSession::disarmed`],
//! [`NodeSession::unable_to_arm`]).

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::Config;
use crate::delivery::{DeliveryAction, DeliveryManager, QueuedPacket};
use crate::error::{DeliveryError, Error, ProtocolError, Result};
use crate::protocol::{MessageType, ModuleFlags, Packet, Sound};
use crate::transport::{BackoffArbiter, BusTransport, Line};
use crate::types::{Address, Mode, NodeStats, SequenceNumber};

/// Identity of this node on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's bus address.
    #[serde(default = "default_address")]
    pub address: Address,

    /// Address game events are reported to.
    #[serde(default = "default_controller")]
    pub controller: Address,

    /// Capability flags advertised by this module.
    #[serde(default)]
    pub flags: ModuleFlags,
}

fn default_address() -> Address {
    Address::DEFAULT_MODULE
}
fn default_controller() -> Address {
    Address::CONTROLLER
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            controller: default_controller(),
            flags: ModuleFlags::NONE,
        }
    }
}

/// Something the game logic should know about, produced by [`NodeSession::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message addressed to this node, already acknowledged.
    Received(Packet),
    /// The session's mode changed.
    ModeChanged { from: Mode, to: Mode },
    /// A queued packet was acknowledged.
    Delivered {
        seq: SequenceNumber,
        dest: Address,
        message_type: MessageType,
        attempts: u32,
        latency: Duration,
    },
    /// A queued packet exhausted its attempts.
    DeliveryFailed {
        seq: SequenceNumber,
        dest: Address,
        message_type: MessageType,
        attempts: u32,
    },
}

impl SessionEvent {
    /// The failure as an error, for callers that propagate it.
    pub fn as_error(&self) -> Option<Error> {
        match *self {
            Self::DeliveryFailed {
                seq,
                dest,
                message_type,
                attempts,
            } => Some(
                DeliveryError::DeliveryFailed {
                    dest,
                    kind: message_type,
                    seq,
                    attempts,
                }
                .into(),
            ),
            _ => None,
        }
    }
}

/// A node on the shared bus.
pub struct NodeSession<L, C> {
    config: NodeConfig,
    mode: Mode,
    transport: BusTransport<L, C>,
    arbiter: BackoffArbiter,
    delivery: DeliveryManager,
    /// Frames drained while backing off, handled on the next poll.
    inbox: VecDeque<Packet>,
    /// Last dispatched sequence number per sender.
    peers: HashMap<Address, SequenceNumber>,
    events: Vec<SessionEvent>,
    stats: NodeStats,
}

impl<L: Line, C: Clock> NodeSession<L, C> {
    /// Create a session in `SLEEP` mode.
    pub fn new(config: &Config, line: L, clock: C) -> Result<Self> {
        config.validate()?;

        tracing::info!(
            address = %config.node.address,
            controller = %config.node.controller,
            "Bus node started"
        );

        Ok(Self {
            config: config.node.clone(),
            mode: Mode::Sleep,
            transport: BusTransport::new(line, clock, config.bus.clone()),
            arbiter: BackoffArbiter::new(config.backoff.clone()),
            delivery: DeliveryManager::new(config.node.address, config.delivery.clone()),
            inbox: VecDeque::new(),
            peers: HashMap::new(),
            events: Vec::new(),
            stats: NodeStats::default(),
        })
    }

    pub fn address(&self) -> Address {
        self.config.address
    }

    pub fn controller(&self) -> Address {
        self.config.controller
    }

    pub fn flags(&self) -> ModuleFlags {
        self.config.flags
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Last sequence number issued or observed.
    pub fn last_seq_seen(&self) -> Option<SequenceNumber> {
        self.delivery.last_seq_seen()
    }

    pub fn delivery(&self) -> &DeliveryManager {
        &self.delivery
    }

    pub fn transport(&self) -> &BusTransport<L, C> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut BusTransport<L, C> {
        &mut self.transport
    }

    /// Counters for this node, transport counters included.
    pub fn stats(&self) -> NodeStats {
        let line = self.transport.stats();
        NodeStats {
            frames_sent: line.frames_sent,
            checksum_errors: line.checksum_errors,
            malformed_frames: line.malformed_frames,
            short_reads: line.short_reads,
            ..self.stats.clone()
        }
    }

    /// Run one tick: handle inbound frames, then service retransmissions.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        while let Some(packet) = self.inbox.pop_front() {
            self.handle_packet(packet);
        }

        if let Some(packet) = self.transport.poll() {
            self.handle_packet(packet);
        }

        self.service_delivery();
        std::mem::take(&mut self.events)
    }

    /// Queue a packet for acknowledged delivery and try to send it right away.
    ///
    /// Returns once the packet is queued; delivery is reported by later polls.
    pub fn queue_send(&mut self, dest: Address, message_type: MessageType, payload: Vec<u8>) -> Result<()> {
        self.delivery
            .enqueue(QueuedPacket::new(dest, message_type, payload))?;
        tracing::debug!(dest = %dest, kind = %message_type, "Packet queued");
        self.service_delivery();
        Ok(())
    }

    /// Report that the module could not arm.
    pub fn unable_to_arm(&mut self) -> Result<()> {
        self.queue_send(self.config.controller, MessageType::Error, Vec::new())
    }

    /// Report the module solved. Mode becomes `DISARMED` immediately.
    pub fn disarmed(&mut self) -> Result<()> {
        self.reject_if_terminal("disarm")?;
        self.queue_send(self.config.controller, MessageType::Defused, Vec::new())?;
        self.set_mode(Mode::Disarmed)
    }

    /// Report a mistake.
    pub fn strike(&mut self) -> Result<()> {
        self.reject_if_terminal("strike")?;
        self.queue_send(self.config.controller, MessageType::Strike, Vec::new())
    }

    /// Ask the controller to play a sound cue.
    pub fn play_sound(&mut self, sound: Sound) -> Result<()> {
        let code = sound
            .code()
            .ok_or_else(|| ProtocolError::UnknownSound(format!("{sound:?}")))?;
        self.queue_send(self.config.controller, MessageType::Sound, vec![code])
    }

    /// Change mode. A terminal mode cannot be left.
    pub fn set_mode(&mut self, to: Mode) -> Result<()> {
        let from = self.mode;
        if from == to {
            return Ok(());
        }
        if from.is_terminal() {
            return Err(DeliveryError::TerminalMode {
                mode: from,
                action: "mode change",
            }
            .into());
        }

        self.mode = to;
        tracing::info!(from = %from, to = %to, "Mode changed");
        self.events.push(SessionEvent::ModeChanged { from, to });
        Ok(())
    }

    fn reject_if_terminal(&self, action: &'static str) -> Result<()> {
        if self.mode.is_terminal() {
            return Err(DeliveryError::TerminalMode {
                mode: self.mode,
                action,
            }
            .into());
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: Packet) {
        if packet.dest != self.config.address {
            self.stats.foreign_frames += 1;
            tracing::trace!(
                source = %packet.source,
                dest = %packet.dest,
                kind = %packet.message_type,
                "Ignoring frame for another node"
            );
            return;
        }
        self.stats.frames_received += 1;

        match packet.message_type {
            MessageType::Ack => self.handle_ack(&packet),
            MessageType::Configure => {
                if self.accept(&packet) {
                    self.advance_mode(Mode::Sleep, Mode::Ready);
                    self.events.push(SessionEvent::Received(packet));
                }
            }
            MessageType::Start => {
                if self.accept(&packet) {
                    self.advance_mode(Mode::Ready, Mode::Armed);
                    self.events.push(SessionEvent::Received(packet));
                }
            }
            MessageType::RequestId
            | MessageType::ResponseId
            | MessageType::Stop
            | MessageType::Strike
            | MessageType::Error
            | MessageType::Defused
            | MessageType::Needy
            | MessageType::ReadStatus
            | MessageType::Status
            | MessageType::Sound => {
                if self.accept(&packet) {
                    self.events.push(SessionEvent::Received(packet));
                }
            }
        }
    }

    fn handle_ack(&mut self, packet: &Packet) {
        let now = self.transport.now();
        match self.delivery.acknowledge(packet.source, packet.seq, now) {
            Some(delivered) => {
                self.stats.acks_received += 1;
                self.stats.delivered += 1;
                tracing::debug!(
                    seq = delivered.seq.0,
                    dest = %delivered.dest,
                    kind = %delivered.message_type,
                    attempts = delivered.attempts,
                    "Packet acknowledged"
                );
                self.events.push(SessionEvent::Delivered {
                    seq: delivered.seq,
                    dest: delivered.dest,
                    message_type: delivered.message_type,
                    attempts: delivered.attempts,
                    latency: delivered.latency,
                });
                // The next queued packet need not wait for the tick.
                self.service_delivery();
            }
            None => {
                tracing::debug!(
                    seq = packet.seq.0,
                    source = %packet.source,
                    "Ignoring stale ACK"
                );
            }
        }
    }

    /// ACK an inbound message and report whether it is new.
    fn accept(&mut self, packet: &Packet) -> bool {
        self.send_ack(packet.source, packet.seq);

        if self.peers.get(&packet.source) == Some(&packet.seq) {
            self.stats.duplicates += 1;
            tracing::debug!(
                seq = packet.seq.0,
                source = %packet.source,
                "Duplicate frame acknowledged again"
            );
            return false;
        }

        self.peers.insert(packet.source, packet.seq);
        self.delivery.observe(packet.seq);
        true
    }

    fn advance_mode(&mut self, from: Mode, to: Mode) {
        if self.mode == from {
            // `from` is never terminal here.
            let _ = self.set_mode(to);
        }
    }

    fn send_ack(&mut self, dest: Address, seq: SequenceNumber) {
        let ack = Packet::ack(self.config.address, dest, seq);
        match ack.encode() {
            Ok(frame) => {
                if self.send_frame(&frame).is_ok() {
                    self.stats.acks_sent += 1;
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode ACK"),
        }
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let result = self
            .arbiter
            .send(&mut self.transport, frame, &mut self.inbox);
        if let Err(ref e) = result {
            self.stats.busy_backoffs += 1;
            tracing::debug!(error = %e, "Send abandoned, line busy");
        }
        result.map(|_| ())
    }

    fn service_delivery(&mut self) {
        let now = self.transport.now();
        while let Some(action) = self.delivery.poll(now) {
            match action {
                DeliveryAction::Transmit {
                    seq,
                    dest,
                    message_type,
                    frame,
                    attempt,
                } => {
                    if attempt > 1 {
                        self.stats.retransmissions += 1;
                        tracing::debug!(
                            seq = seq.0,
                            dest = %dest,
                            kind = %message_type,
                            attempt,
                            "Retransmitting unacknowledged packet"
                        );
                    }
                    // A failed send is covered by the next retry.
                    let _ = self.send_frame(&frame);
                    break;
                }
                DeliveryAction::Failed {
                    seq,
                    packet,
                    attempts,
                } => {
                    self.stats.delivery_failures += 1;
                    tracing::warn!(
                        seq = seq.0,
                        dest = %packet.dest,
                        kind = %packet.message_type,
                        attempts,
                        "Delivery failed"
                    );
                    self.events.push(SessionEvent::DeliveryFailed {
                        seq,
                        dest: packet.dest,
                        message_type: packet.message_type,
                        attempts,
                    });
                }
            }
        }
    }
}
