//! Reconnection backoff.

use rand::Rng;
use std::time::Duration;

/// How long a link waits between reconnection attempts.
///
/// Delays start at `initial_delay`, grow by `factor` after every failed
/// attempt and never exceed `max_delay`. With `jitter`, up to a quarter of
/// the delay is added at random so a fleet of gateways does not reconnect in
/// lockstep after a broker restart.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: u32,
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Doubling delays without jitter.
    pub fn fixed(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            jitter: false,
            ..Default::default()
        }
    }

    /// Start a fresh delay sequence.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            current: None,
            attempts: 0,
        }
    }

    fn spread(&self, delay: Duration) -> Duration {
        let quarter_ms = (delay.as_millis() / 4) as u64;
        if !self.jitter || quarter_ms == 0 {
            return delay;
        }
        let extra = Duration::from_millis(rand::thread_rng().gen_range(0..=quarter_ms));
        (delay + extra).min(self.max_delay)
    }
}

/// A running sequence of reconnection delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let base = match self.current {
            None => self.policy.initial_delay,
            Some(previous) => previous.saturating_mul(self.policy.factor.max(1)),
        }
        .min(self.policy.max_delay);

        self.current = Some(base);
        self.attempts = self.attempts.saturating_add(1);
        self.policy.spread(base)
    }

    /// Failed attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Back to the initial delay, after a successful connection.
    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_then_cap() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(100), Duration::from_millis(500));
        let mut backoff = policy.backoff();

        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(backoff.attempts(), 5);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        let mut backoff = policy.backoff();
        for _ in 0..64 {
            let delay = backoff.next_delay();
            assert!(delay >= policy.initial_delay);
            assert!(delay <= policy.max_delay);
        }
    }

    #[test]
    fn test_zero_factor_does_not_shrink() {
        let policy = ReconnectPolicy {
            factor: 0,
            ..ReconnectPolicy::fixed(Duration::from_millis(50), Duration::from_secs(1))
        };
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
