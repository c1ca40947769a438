//! Capped exponential reconnect delay.

use std::time::Duration;

use nowserving_core::config::ClientConfig;

/// First reconnect delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling of the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(5000);

/// Delay schedule for reconnecting a dropped push connection.
///
/// The `n`-th consecutive failure waits `initial * 2^(n-1)`, capped at
/// `max`. There is no attempt limit; [`Self::reset`] after a successful
/// connect starts the schedule over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    /// A schedule starting at `initial` and never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// The schedule configured under `client`.
    pub fn from_config(client: &ClientConfig) -> Self {
        Self::new(client.reconnect_initial(), client.reconnect_max())
    }

    /// Number of delays handed out since the last reset.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The delay before the next attempt. Advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let multiplier = 1_u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.initial.saturating_mul(multiplier).min(self.max)
    }

    /// Start over from the initial delay.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(INITIAL_BACKOFF, MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(delays: &[Duration]) -> Vec<u128> {
        delays.iter().map(Duration::as_millis).collect()
    }

    #[test]
    fn doubles_up_to_the_ceiling() {
        let mut backoff = ReconnectBackoff::default();
        let delays: Vec<Duration> = (0..7).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            millis(&delays),
            vec![500, 1000, 2000, 4000, 5000, 5000, 5000]
        );
        assert_eq!(backoff.attempt(), 7);
    }

    #[test]
    fn reset_starts_over() {
        let mut backoff = ReconnectBackoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }

    #[test]
    fn never_overflows_on_long_outages() {
        let mut backoff = ReconnectBackoff::default();
        for _ in 0..100 {
            assert!(backoff.next_delay() <= MAX_BACKOFF);
        }
        assert_eq!(backoff.next_delay(), MAX_BACKOFF);
    }

    #[test]
    fn follows_the_configured_schedule() {
        let client = ClientConfig {
            poll_interval_ms: 1500,
            reconnect_initial_ms: 100,
            reconnect_max_ms: 250,
        };
        let mut backoff = ReconnectBackoff::from_config(&client);
        let delays: Vec<Duration> = (0..3).map(|_| backoff.next_delay()).collect();
        assert_eq!(millis(&delays), vec![100, 200, 250]);
    }
}
