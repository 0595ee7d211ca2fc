//! Bus transport for the shared half-duplex line.
//!
//! The physical line is consumed through the [`Line`] trait: a receive path that
//! can report activity, a send-intent line asserted ahead of a transmission, and
//! byte-level reads and writes with a timeout. [`BusTransport`] turns that into
//! frame-level `poll` and `transmit`, and [`BackoffArbiter`] gates transmissions
//! with listen-before-talk.

mod backoff;
mod memory;

pub use backoff::{BackoffArbiter, BackoffConfig};
pub use memory::{BusRecord, Fault, MemoryBus, MemoryLine};

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::protocol::{frame_size, Packet, HEADER_SIZE, LENGTH_FIELD_SIZE};

/// Bits on the wire per byte: start, eight data bits, stop.
pub const BITS_PER_UART_FRAME: u32 = 10;

/// Bus timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Serial line speed.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// How long the send-intent line is held before the first byte.
    #[serde(default = "default_settle_time", with = "humantime_serde")]
    pub settle_time: Duration,

    /// Deadline for each byte-level read of a frame.
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Bound on waiting for an observed transmission to end.
    #[serde(default = "default_quiet_timeout", with = "humantime_serde")]
    pub quiet_timeout: Duration,

    /// Sampling period while waiting for the line to go quiet.
    #[serde(default = "default_quiet_poll", with = "humantime_serde")]
    pub quiet_poll: Duration,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_settle_time() -> Duration {
    Duration::from_millis(100)
}
fn default_read_timeout() -> Duration {
    Duration::from_secs(1)
}
fn default_quiet_timeout() -> Duration {
    Duration::from_millis(200)
}
fn default_quiet_poll() -> Duration {
    Duration::from_millis(1)
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            settle_time: default_settle_time(),
            read_timeout: default_read_timeout(),
            quiet_timeout: default_quiet_timeout(),
            quiet_poll: default_quiet_poll(),
        }
    }
}

impl BusConfig {
    /// Time to clock one byte onto the line at the configured baud rate.
    pub fn frame_time(&self) -> Duration {
        Duration::from_secs_f64(f64::from(BITS_PER_UART_FRAME) / f64::from(self.baud_rate.max(1)))
    }
}

/// Physical half-duplex line.
pub trait Line {
    /// Whether the receive side currently shows another node transmitting.
    fn is_active(&mut self) -> bool;

    /// Assert or release the send-intent line.
    fn set_send_intent(&mut self, asserted: bool) -> Result<()>;

    /// Write bytes, returning once they are on the line.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns the number of bytes read; fewer than requested means the deadline passed.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Drop whatever remains of a frame that could not be parsed.
    fn discard_input(&mut self) -> Result<()> {
        let mut scratch = [0u8; 64];
        while self.read(&mut scratch, Duration::ZERO)? > 0 {}
        Ok(())
    }
}

/// Transport counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub checksum_errors: u64,
    pub malformed_frames: u64,
    pub short_reads: u64,
    pub quiet_timeouts: u64,
}

/// Frame-level access to the shared line.
pub struct BusTransport<L, C> {
    line: L,
    clock: C,
    config: BusConfig,
    stats: TransportStats,
}

impl<L: Line, C: Clock> BusTransport<L, C> {
    pub fn new(line: L, clock: C, config: BusConfig) -> Self {
        Self {
            line,
            clock,
            config,
            stats: TransportStats::default(),
        }
    }

    /// Non-blocking check for an inbound frame.
    ///
    /// Returns immediately when the line is idle. Otherwise reads one frame;
    /// a damaged or incomplete frame is logged and reported as nothing received.
    pub fn poll(&mut self) -> Option<Packet> {
        if !self.line.is_active() {
            return None;
        }
        self.receive()
    }

    /// Read the frame whose activity the caller has already observed.
    pub fn receive(&mut self) -> Option<Packet> {
        match self.read_frame() {
            Ok(packet) => {
                self.stats.frames_received += 1;
                Some(packet)
            }
            Err(e) => {
                if e.is_corrupt_frame() {
                    tracing::warn!(error = %e, "Discarding corrupt frame");
                } else {
                    tracing::debug!(error = %e, "Nothing received");
                }
                None
            }
        }
    }

    /// Drive the send-intent preamble, write the frame, release the line.
    pub fn transmit(&mut self, frame: &[u8]) -> Result<()> {
        self.line.set_send_intent(true)?;
        self.clock.sleep(self.config.settle_time);

        let written = self.line.write(frame);
        let released = self.line.set_send_intent(false);
        written?;
        released?;

        self.stats.frames_sent += 1;
        tracing::trace!(len = frame.len(), "Frame transmitted");
        Ok(())
    }

    /// Sample the receive line.
    pub fn line_active(&mut self) -> bool {
        self.line.is_active()
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    pub fn line_mut(&mut self) -> &mut L {
        &mut self.line
    }

    fn read_frame(&mut self) -> Result<Packet> {
        self.wait_for_quiet()?;

        let mut length = [0u8; LENGTH_FIELD_SIZE];
        if self.line.read(&mut length, self.config.read_timeout)? == 0 {
            self.stats.short_reads += 1;
            return Err(ProtocolError::ShortRead {
                expected: LENGTH_FIELD_SIZE,
                got: 0,
            }
            .into());
        }

        let length = length[0];
        if (length as usize) < HEADER_SIZE {
            self.stats.malformed_frames += 1;
            self.discard_rest();
            return Err(ProtocolError::LengthTooSmall {
                length,
                min: HEADER_SIZE,
            }
            .into());
        }

        let mut frame = vec![0u8; frame_size(length)];
        frame[0] = length;
        let got = self.line.read(&mut frame[1..], self.config.read_timeout)?;
        if got + LENGTH_FIELD_SIZE < frame.len() {
            self.stats.short_reads += 1;
            self.discard_rest();
            return Err(ProtocolError::ShortRead {
                expected: frame.len(),
                got: got + LENGTH_FIELD_SIZE,
            }
            .into());
        }

        let packet = Packet::decode(&frame);
        if let Err(Error::Protocol(ProtocolError::ChecksumMismatch { .. })) = packet {
            self.stats.checksum_errors += 1;
        }
        packet
    }

    /// Resynchronize after a frame whose boundary is lost.
    fn discard_rest(&mut self) {
        if let Err(e) = self.line.discard_input() {
            tracing::debug!(error = %e, "Failed to discard partial frame");
        }
    }

    /// Block until the sender releases the line, bounded by `quiet_timeout`.
    fn wait_for_quiet(&mut self) -> Result<()> {
        let deadline = self.clock.now() + self.config.quiet_timeout;
        while self.line.is_active() {
            if self.clock.now() >= deadline {
                self.stats.quiet_timeouts += 1;
                return Err(TransportError::ActivityTimeout(self.config.quiet_timeout).into());
            }
            self.clock.sleep(self.config.quiet_poll);
        }
        Ok(())
    }
}
