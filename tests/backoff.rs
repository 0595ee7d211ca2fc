//! Listen-before-talk tests against a scripted line
//!
//! The scripted line records every call the transport makes, so the tests can
//! check the order of operations on the wire side:
//! 1. Nothing is written while the line is busy
//! 2. Every busy observation drains the frame that caused it
//! 3. The send-intent line brackets every write

use std::collections::VecDeque;
use std::time::Duration;

use ktane_bus::clock::ManualClock;
use ktane_bus::error::{Error, Result, TransportError};
use ktane_bus::protocol::{MessageType, Packet};
use ktane_bus::transport::{BackoffArbiter, BackoffConfig, BusConfig, BusTransport, Line};
use ktane_bus::types::{Address, SequenceNumber};

// ============================================================================
// Scripted Line
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Op {
    Active(bool),
    Intent(bool),
    Write(Vec<u8>),
    Read(usize),
}

/// Line that reports activity for a fixed number of samples.
#[derive(Default)]
struct ScriptedLine {
    busy_samples: usize,
    rx: VecDeque<u8>,
    ops: Vec<Op>,
}

impl ScriptedLine {
    fn busy_for(samples: usize, rx: &[u8]) -> Self {
        Self {
            busy_samples: samples,
            rx: rx.iter().copied().collect(),
            ops: Vec::new(),
        }
    }

    fn first_write(&self) -> Option<usize> {
        self.ops.iter().position(|op| matches!(op, Op::Write(_)))
    }
}

impl Line for ScriptedLine {
    fn is_active(&mut self) -> bool {
        let active = self.busy_samples > 0;
        self.busy_samples = self.busy_samples.saturating_sub(1);
        self.ops.push(Op::Active(active));
        active
    }

    fn set_send_intent(&mut self, asserted: bool) -> Result<()> {
        self.ops.push(Op::Intent(asserted));
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.ops.push(Op::Write(data.to_vec()));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        self.ops.push(Op::Read(n));
        Ok(n)
    }
}

fn frame(kind: MessageType, seq: u8) -> Vec<u8> {
    Packet::new(
        Address::CONTROLLER,
        Address(0x10),
        kind,
        SequenceNumber(seq),
        vec![],
    )
    .unwrap()
    .encode()
    .unwrap()
}

fn arbiter(max_busy_polls: u32) -> BackoffArbiter {
    BackoffArbiter::new(BackoffConfig {
        max_busy_polls,
        seed: Some(3),
        ..Default::default()
    })
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_idle_line_writes_after_one_sample() {
    let clock = ManualClock::new();
    let mut transport = BusTransport::new(ScriptedLine::default(), clock.clone(), BusConfig::default());
    let out = frame(MessageType::Strike, 1);

    let busy = arbiter(8)
        .send(&mut transport, &out, &mut VecDeque::new())
        .unwrap();

    assert_eq!(busy, 0);
    assert_eq!(
        transport.line().ops,
        vec![
            Op::Active(false),
            Op::Intent(true),
            Op::Write(out),
            Op::Intent(false),
        ]
    );
    assert_eq!(clock.elapsed(), BusConfig::default().settle_time);
}

#[test]
fn test_busy_line_drains_before_writing() {
    let clock = ManualClock::new();
    let inbound = frame(MessageType::Configure, 9);
    // One sample for the arbiter, one for the transport's quiet wait.
    let line = ScriptedLine::busy_for(2, &inbound);
    let mut transport = BusTransport::new(line, clock.clone(), BusConfig::default());
    let mut drained = VecDeque::new();
    let out = frame(MessageType::Strike, 1);

    let busy = arbiter(8).send(&mut transport, &out, &mut drained).unwrap();

    assert_eq!(busy, 1);
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].message_type, MessageType::Configure);

    let ops = &transport.line().ops;
    let write_at = transport.line().first_write().unwrap();
    let first_read = ops.iter().position(|op| matches!(op, Op::Read(_))).unwrap();
    assert!(first_read < write_at, "drain must happen before the write");
    assert_eq!(ops[write_at - 2], Op::Active(false));
    assert_eq!(ops[write_at - 1], Op::Intent(true));
    assert_eq!(ops[write_at + 1], Op::Intent(false));
    assert_eq!(ops.iter().filter(|op| **op == Op::Active(true)).count(), 2);

    // Backoff plus settle time have passed.
    assert!(clock.elapsed() >= Duration::from_millis(1) + BusConfig::default().settle_time);
}

#[test]
fn test_persistently_busy_line_abandons_send() {
    let clock = ManualClock::new();
    let line = ScriptedLine::busy_for(usize::MAX, &[]);
    let config = BusConfig {
        quiet_timeout: Duration::from_millis(3),
        ..Default::default()
    };
    let mut transport = BusTransport::new(line, clock, config);

    let err = arbiter(4)
        .send(&mut transport, &frame(MessageType::Strike, 1), &mut VecDeque::new())
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::BusBusy { polls: 4 })
    ));
    assert!(transport.line().first_write().is_none());
    assert!(!transport.line().ops.contains(&Op::Intent(true)));
}
