//! Listen-before-talk arbitration.

use std::collections::VecDeque;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{BusTransport, Line};
use crate::clock::Clock;
use crate::error::{Result, TransportError};
use crate::protocol::Packet;

/// Backoff configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Shortest randomized delay after a busy observation.
    #[serde(default = "default_min_delay", with = "humantime_serde")]
    pub min_delay: Duration,

    /// Longest randomized delay after a busy observation.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Busy observations tolerated before a send is abandoned.
    #[serde(default = "default_max_busy_polls")]
    pub max_busy_polls: u32,

    /// Fixed RNG seed for reproducible backoff.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_min_delay() -> Duration {
    Duration::from_millis(1)
}
fn default_max_delay() -> Duration {
    Duration::from_millis(5)
}
fn default_max_busy_polls() -> u32 {
    64
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay: default_min_delay(),
            max_delay: default_max_delay(),
            max_busy_polls: default_max_busy_polls(),
            seed: None,
        }
    }
}

/// Gates transmissions until the line is observed idle.
///
/// Two nodes that both observe an idle line in the same window can still
/// collide; retransmission on timeout covers that.
pub struct BackoffArbiter {
    config: BackoffConfig,
    rng: StdRng,
}

impl BackoffArbiter {
    pub fn new(config: BackoffConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { config, rng }
    }

    /// Draw the next backoff delay, uniform over `[min_delay, max_delay]`.
    pub fn next_delay(&mut self) -> Duration {
        if self.config.min_delay >= self.config.max_delay {
            return self.config.min_delay;
        }
        self.rng
            .gen_range(self.config.min_delay..=self.config.max_delay)
    }

    /// Wait for an idle line, draining every frame heard while it was busy.
    ///
    /// Returns the number of busy observations.
    pub fn acquire<L: Line, C: Clock>(
        &mut self,
        transport: &mut BusTransport<L, C>,
        drained: &mut VecDeque<Packet>,
    ) -> Result<u32> {
        let mut busy = 0;
        while transport.line_active() {
            busy += 1;
            if let Some(packet) = transport.receive() {
                drained.push_back(packet);
            }
            if busy >= self.config.max_busy_polls {
                return Err(TransportError::BusBusy { polls: busy }.into());
            }

            let delay = self.next_delay();
            tracing::trace!(busy, delay_us = delay.as_micros() as u64, "Line busy, backing off");
            transport.sleep(delay);
        }
        Ok(busy)
    }

    /// Acquire the line, then transmit `frame`.
    pub fn send<L: Line, C: Clock>(
        &mut self,
        transport: &mut BusTransport<L, C>,
        frame: &[u8],
        drained: &mut VecDeque<Packet>,
    ) -> Result<u32> {
        let busy = self.acquire(transport, drained)?;
        transport.transmit(frame)?;
        Ok(busy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::{BusConfig, MemoryBus};

    fn seeded() -> BackoffArbiter {
        BackoffArbiter::new(BackoffConfig {
            seed: Some(7),
            ..Default::default()
        })
    }

    #[test]
    fn test_delay_within_bounds() {
        let mut arbiter = seeded();
        for _ in 0..1000 {
            let d = arbiter.next_delay();
            assert!(d >= Duration::from_millis(1) && d <= Duration::from_millis(5));
        }
    }

    #[test]
    fn test_seeded_delays_repeat() {
        let a: Vec<_> = {
            let mut arb = seeded();
            (0..16).map(|_| arb.next_delay()).collect()
        };
        let b: Vec<_> = {
            let mut arb = seeded();
            (0..16).map(|_| arb.next_delay()).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_idle_line_sends_without_delay() {
        let bus = MemoryBus::new();
        let clock = ManualClock::new();
        let _peer = bus.attach();
        let config = BusConfig::default();
        let mut transport = BusTransport::new(bus.attach(), clock.clone(), config.clone());
        let mut drained = VecDeque::new();

        let busy = seeded().send(&mut transport, &[1, 2, 3], &mut drained).unwrap();
        assert_eq!(busy, 0);
        assert_eq!(clock.elapsed(), config.settle_time);
        assert_eq!(bus.history().len(), 1);
    }

    #[test]
    fn test_jammed_line_gives_up() {
        let bus = MemoryBus::new();
        let clock = ManualClock::new();
        let mut jammer = bus.attach();
        let config = BusConfig {
            quiet_timeout: Duration::from_millis(2),
            ..Default::default()
        };
        let mut transport = BusTransport::new(bus.attach(), clock, config);
        let mut arbiter = BackoffArbiter::new(BackoffConfig {
            max_busy_polls: 5,
            seed: Some(1),
            ..Default::default()
        });

        jammer.set_send_intent(true).unwrap();
        let err = arbiter
            .send(&mut transport, &[1, 2, 3], &mut VecDeque::new())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::BusBusy { polls: 5 })
        ));
        assert!(bus.history().is_empty());
    }
}
