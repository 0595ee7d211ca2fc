//! In-memory shared bus for simulation and tests.
//!
//! Every [`MemoryLine`] attached to a [`MemoryBus`] hears every frame written by
//! the others. A line reports activity while another endpoint holds its send
//! intent, and once for each frame waiting in its receive buffer (the preamble
//! that announced it). Faults can be queued to drop, corrupt or truncate the
//! next frames written. The write history is bounded; only the most recent
//! records are kept.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::Line;
use crate::error::Result;

/// Records kept by [`MemoryBus::history`] unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 4096;

/// Damage applied to the next frame written on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Nobody receives the frame.
    Drop,
    /// XOR `mask` into the byte at `index`.
    Corrupt { index: usize, mask: u8 },
    /// Deliver only the first `n` bytes.
    Truncate(usize),
}

/// One frame as written on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusRecord {
    /// Endpoint that wrote the frame.
    pub tap: usize,
    /// Bytes as written by the sender, before any fault.
    pub bytes: Vec<u8>,
    /// Fault applied in transit.
    pub fault: Option<Fault>,
}

#[derive(Debug)]
struct RxFrame {
    bytes: Vec<u8>,
    pos: usize,
    announced: bool,
}

#[derive(Debug, Default)]
struct TapState {
    intent: bool,
    rx: VecDeque<RxFrame>,
}

#[derive(Debug)]
struct BusState {
    taps: Vec<TapState>,
    faults: VecDeque<Fault>,
    history: VecDeque<BusRecord>,
    history_limit: usize,
}

impl Default for BusState {
    fn default() -> Self {
        Self {
            taps: Vec::new(),
            faults: VecDeque::new(),
            history: VecDeque::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Shared in-memory bus.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<BusState>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bus that keeps at most `limit` records of write history.
    pub fn with_history_limit(limit: usize) -> Self {
        let bus = Self::default();
        bus.state.lock().history_limit = limit;
        bus
    }

    /// Attach a new endpoint.
    pub fn attach(&self) -> MemoryLine {
        let mut state = self.state.lock();
        state.taps.push(TapState::default());
        MemoryLine {
            bus: self.clone(),
            tap: state.taps.len() - 1,
        }
    }

    /// Queue a fault for the next frame written.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Drop the next `count` frames written.
    pub fn drop_next(&self, count: usize) {
        let mut state = self.state.lock();
        state.faults.extend(std::iter::repeat(Fault::Drop).take(count));
    }

    /// Frames written so far, oldest first, up to the history limit.
    pub fn history(&self) -> Vec<BusRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }

    fn deliver(&self, from: usize, data: &[u8]) {
        let mut state = self.state.lock();
        let fault = state.faults.pop_front();
        if state.history_limit > 0 {
            if state.history.len() >= state.history_limit {
                state.history.pop_front();
            }
            state.history.push_back(BusRecord {
                tap: from,
                bytes: data.to_vec(),
                fault,
            });
        }

        let bytes = match fault {
            None => data.to_vec(),
            Some(Fault::Drop) => return,
            Some(Fault::Corrupt { index, mask }) => {
                let mut bytes = data.to_vec();
                if let Some(b) = bytes.get_mut(index) {
                    *b ^= mask;
                }
                bytes
            }
            Some(Fault::Truncate(n)) => data[..n.min(data.len())].to_vec(),
        };

        for (tap, peer) in state.taps.iter_mut().enumerate() {
            if tap != from && !bytes.is_empty() {
                peer.rx.push_back(RxFrame {
                    bytes: bytes.clone(),
                    pos: 0,
                    announced: false,
                });
            }
        }
    }
}

/// One endpoint of a [`MemoryBus`].
#[derive(Debug)]
pub struct MemoryLine {
    bus: MemoryBus,
    tap: usize,
}

impl MemoryLine {
    /// Endpoint index, as recorded in [`BusRecord::tap`].
    pub fn tap(&self) -> usize {
        self.tap
    }

    /// Bytes waiting in this endpoint's receive buffer.
    pub fn pending_bytes(&self) -> usize {
        let state = self.bus.state.lock();
        state.taps[self.tap]
            .rx
            .iter()
            .map(|f| f.bytes.len() - f.pos)
            .sum()
    }
}

impl Line for MemoryLine {
    fn is_active(&mut self) -> bool {
        let mut state = self.bus.state.lock();
        let peer_sending = state
            .taps
            .iter()
            .enumerate()
            .any(|(tap, peer)| tap != self.tap && peer.intent);
        if peer_sending {
            return true;
        }

        match state.taps[self.tap].rx.front_mut() {
            Some(frame) if !frame.announced => {
                frame.announced = true;
                true
            }
            _ => false,
        }
    }

    fn set_send_intent(&mut self, asserted: bool) -> Result<()> {
        self.bus.state.lock().taps[self.tap].intent = asserted;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.bus.deliver(self.tap, data);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        let mut state = self.bus.state.lock();
        let rx = &mut state.taps[self.tap].rx;
        if rx.front().is_some_and(|frame| frame.pos > 0) {
            rx.pop_front();
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = self.bus.state.lock();
        let rx = &mut state.taps[self.tap].rx;

        let mut filled = 0;
        while filled < buf.len() {
            let Some(frame) = rx.front_mut() else {
                break;
            };
            let n = (frame.bytes.len() - frame.pos).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&frame.bytes[frame.pos..frame.pos + n]);
            frame.pos += n;
            filled += n;
            if frame.pos == frame.bytes.len() {
                rx.pop_front();
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_to_other_taps() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let b = bus.attach();
        let c = bus.attach();

        a.write(&[1, 2, 3]).unwrap();
        assert_eq!(a.pending_bytes(), 0);
        assert_eq!(b.pending_bytes(), 3);
        assert_eq!(c.pending_bytes(), 3);
        assert_eq!(bus.history().len(), 1);
        assert_eq!(bus.history()[0].tap, a.tap());
    }

    #[test]
    fn test_activity_announced_once_per_frame() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();

        a.write(&[1, 2]).unwrap();
        a.write(&[3]).unwrap();

        assert!(b.is_active());
        assert!(!b.is_active());

        let mut buf = [0u8; 2];
        assert_eq!(b.read(&mut buf, Duration::ZERO).unwrap(), 2);
        assert_eq!(buf, [1, 2]);

        assert!(b.is_active());
        let mut buf = [0u8; 4];
        assert_eq!(b.read(&mut buf, Duration::ZERO).unwrap(), 1);
        assert!(!b.is_active());
    }

    #[test]
    fn test_send_intent_is_activity_for_peers_only() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();

        a.set_send_intent(true).unwrap();
        assert!(b.is_active());
        assert!(!a.is_active());
        a.set_send_intent(false).unwrap();
        assert!(!b.is_active());
    }

    #[test]
    fn test_discard_drops_only_partial_frame() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();

        a.write(&[1, 2, 3]).unwrap();
        a.write(&[4, 5]).unwrap();

        b.discard_input().unwrap();
        assert_eq!(b.pending_bytes(), 5);

        let mut buf = [0u8; 1];
        b.read(&mut buf, Duration::ZERO).unwrap();
        b.discard_input().unwrap();
        assert_eq!(b.pending_bytes(), 2);
    }

    #[test]
    fn test_history_keeps_most_recent() {
        let bus = MemoryBus::with_history_limit(2);
        let mut a = bus.attach();

        a.write(&[1]).unwrap();
        a.write(&[2]).unwrap();
        a.write(&[3]).unwrap();

        let history = bus.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].bytes, vec![2]);
        assert_eq!(history[1].bytes, vec![3]);
    }

    #[test]
    fn test_faults_apply_in_order() {
        let bus = MemoryBus::new();
        let mut a = bus.attach();
        let b = bus.attach();

        bus.drop_next(1);
        bus.inject(Fault::Truncate(1));
        a.write(&[9, 9]).unwrap();
        a.write(&[7, 7]).unwrap();
        a.write(&[5, 5]).unwrap();

        assert_eq!(b.pending_bytes(), 3);
        let history = bus.history();
        assert_eq!(history[0].fault, Some(Fault::Drop));
        assert_eq!(history[1].fault, Some(Fault::Truncate(1)));
        assert_eq!(history[2].fault, None);
    }
}
