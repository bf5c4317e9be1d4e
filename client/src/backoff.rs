//! Reconnect backoff (§4.7, §9): exponential delay between reconnect
//! attempts, reset on a successful `Registered`.
//!
//! The teacher reconnects on a flat `RECONNECT_DELAY_SECS` sleep
//! (`agent.rs`); this generalizes that single constant into the exponential
//! schedule the specification requires, with §9's cap left configurable and
//! defaulted to unbounded per its stated recommendation.

use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const FACTOR: f64 = 1.5;
const MAX_DELAY: Duration = Duration::from_secs(60);

pub struct Backoff {
    current: Duration,
    attempts: u32,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(max_attempts: Option<u32>) -> Self {
        Self {
            current: INITIAL_DELAY,
            attempts: 0,
            max_attempts,
        }
    }

    /// Returns the delay to wait before the next attempt, or `None` if the
    /// configured attempt cap has been exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts += 1;
        let delay = self.current;
        self.current = MAX_DELAY.min(self.current.mul_f64(FACTOR));
        Some(delay)
    }

    /// Resets the schedule on a successful registration.
    pub fn reset(&mut self) {
        self.current = INITIAL_DELAY;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_and_caps_at_max_delay() {
        let mut b = Backoff::new(None);
        let delays: Vec<Duration> = (0..10).map(|_| b.next_delay().unwrap()).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert!(delays.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(*delays.last().unwrap(), MAX_DELAY);
    }

    #[test]
    fn reset_restarts_from_initial_delay() {
        let mut b = Backoff::new(None);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Some(INITIAL_DELAY));
    }

    #[test]
    fn attempt_cap_exhausts() {
        let mut b = Backoff::new(Some(2));
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_none());
    }
}
