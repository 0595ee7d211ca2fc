//! Acknowledged, ordered delivery of outbound packets.
//!
//! One packet is in flight at a time. Further send requests wait in a bounded
//! FIFO behind it and receive their sequence number when they are promoted, so
//! consecutive deliveries carry consecutive sequence numbers. The in-flight
//! frame is retransmitted byte-for-byte every `retry_interval` until an ACK with
//! its sequence number arrives, or until `max_attempts` is reached if set.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{DeliveryError, ProtocolError, Result};
use crate::protocol::{MessageType, Packet, MAX_PAYLOAD_SIZE};
use crate::types::{Address, SequenceNumber};

/// Delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Wait between transmissions of an unacknowledged packet.
    #[serde(default = "default_retry_interval", with = "humantime_serde")]
    pub retry_interval: Duration,

    /// Transmissions before a packet is given up on. `None` retries forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Packets held at once, the in-flight one included.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_retry_interval() -> Duration {
    Duration::from_millis(500)
}
fn default_queue_depth() -> usize {
    4
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_interval: default_retry_interval(),
            max_attempts: None,
            queue_depth: default_queue_depth(),
        }
    }
}

/// A send request waiting for, or in, its delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub dest: Address,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl QueuedPacket {
    pub fn new(dest: Address, message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            dest,
            message_type,
            payload,
        }
    }
}

/// The packet currently awaiting acknowledgement.
#[derive(Debug)]
struct InFlight {
    packet: QueuedPacket,
    seq: SequenceNumber,
    frame: Vec<u8>,
    attempts: u32,
    first_sent: Instant,
    next_retry: Instant,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryAction {
    /// Put `frame` on the bus.
    Transmit {
        seq: SequenceNumber,
        dest: Address,
        message_type: MessageType,
        frame: Vec<u8>,
        attempt: u32,
    },
    /// The packet exhausted its attempts and was removed.
    Failed {
        seq: SequenceNumber,
        packet: QueuedPacket,
        attempts: u32,
    },
}

/// Outcome of a matching ACK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub seq: SequenceNumber,
    pub dest: Address,
    pub message_type: MessageType,
    pub attempts: u32,
    pub latency: Duration,
}

/// Owns the outbound queue and the in-flight slot.
pub struct DeliveryManager {
    source: Address,
    config: DeliveryConfig,
    queue: VecDeque<QueuedPacket>,
    in_flight: Option<InFlight>,
    last_seq_seen: Option<SequenceNumber>,
}

impl DeliveryManager {
    pub fn new(source: Address, config: DeliveryConfig) -> Self {
        Self {
            source,
            queue: VecDeque::with_capacity(config.queue_depth),
            config,
            in_flight: None,
            last_seq_seen: None,
        }
    }

    /// Accept a send request. Fails when the queue is at depth.
    pub fn enqueue(&mut self, packet: QueuedPacket) -> Result<()> {
        if packet.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: packet.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }

        let depth = self.len();
        if depth >= self.config.queue_depth {
            return Err(DeliveryError::QueueFull { depth }.into());
        }

        self.queue.push_back(packet);
        Ok(())
    }

    /// Next action due at `now`, if any.
    ///
    /// Promotes the head of the queue when nothing is in flight, and schedules
    /// the next retry whenever it asks for a transmission.
    pub fn poll(&mut self, now: Instant) -> Option<DeliveryAction> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return self.promote(now);
        };

        if now < in_flight.next_retry {
            return None;
        }

        if self
            .config
            .max_attempts
            .is_some_and(|max| in_flight.attempts >= max)
        {
            let failed = self.in_flight.take()?;
            return Some(DeliveryAction::Failed {
                seq: failed.seq,
                packet: failed.packet,
                attempts: failed.attempts,
            });
        }

        in_flight.attempts += 1;
        in_flight.next_retry = now + self.config.retry_interval;
        Some(DeliveryAction::Transmit {
            seq: in_flight.seq,
            dest: in_flight.packet.dest,
            message_type: in_flight.packet.message_type,
            frame: in_flight.frame.clone(),
            attempt: in_flight.attempts,
        })
    }

    /// Clear the in-flight packet if `seq` (from `from`) acknowledges it.
    ///
    /// ACKs for any other sequence number or sender are stale or foreign and ignored.
    pub fn acknowledge(&mut self, from: Address, seq: SequenceNumber, now: Instant) -> Option<Delivered> {
        match &self.in_flight {
            Some(f) if f.seq == seq && f.packet.dest == from => {}
            _ => return None,
        }

        let done = self.in_flight.take()?;
        Some(Delivered {
            seq: done.seq,
            dest: done.packet.dest,
            message_type: done.packet.message_type,
            attempts: done.attempts,
            latency: now.saturating_duration_since(done.first_sent),
        })
    }

    /// Record a sequence number seen on an inbound frame.
    ///
    /// Only moves forward (within half the sequence space), so a late duplicate
    /// cannot rewind numbering.
    pub fn observe(&mut self, seq: SequenceNumber) {
        match self.last_seq_seen {
            Some(last) if !(1..128).contains(&seq.distance(last)) => {}
            _ => self.last_seq_seen = Some(seq),
        }
    }

    /// Sequence number the next promoted packet will carry.
    pub fn next_sequence(&self) -> SequenceNumber {
        self.last_seq_seen.map_or(SequenceNumber::ZERO, SequenceNumber::next)
    }

    pub fn last_seq_seen(&self) -> Option<SequenceNumber> {
        self.last_seq_seen
    }

    /// Sequence number and request of the in-flight packet.
    pub fn in_flight(&self) -> Option<(SequenceNumber, &QueuedPacket)> {
        self.in_flight.as_ref().map(|f| (f.seq, &f.packet))
    }

    /// Transmissions so far of the in-flight packet.
    pub fn attempts(&self) -> u32 {
        self.in_flight.as_ref().map_or(0, |f| f.attempts)
    }

    /// Packets held, the in-flight one included.
    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.in_flight.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    fn promote(&mut self, now: Instant) -> Option<DeliveryAction> {
        let packet = self.queue.pop_front()?;
        let seq = self.next_sequence();
        self.last_seq_seen = Some(seq);

        let frame = match Packet::new(
            self.source,
            packet.dest,
            packet.message_type,
            seq,
            packet.payload.clone(),
        )
        .and_then(|p| p.encode())
        {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(seq = seq.0, error = %e, "Unencodable packet dropped");
                return Some(DeliveryAction::Failed {
                    seq,
                    packet,
                    attempts: 0,
                });
            }
        };

        let action = DeliveryAction::Transmit {
            seq,
            dest: packet.dest,
            message_type: packet.message_type,
            frame: frame.clone(),
            attempt: 1,
        };
        self.in_flight = Some(InFlight {
            packet,
            seq,
            frame,
            attempts: 1,
            first_sent: now,
            next_retry: now + self.config.retry_interval,
        });
        Some(action)
    }
}
