//! Backoff idle strategy for busy loops.
//!
//! Escalates from busy-spinning through yielding to a short sleep, so a
//! producer stuck on a full ring burns progressively less CPU the longer
//! it waits.

use std::thread;
use std::time::Duration;

/// How long the strategy sleeps once spins and yields are exhausted.
const SLEEP_PERIOD: Duration = Duration::from_micros(1);

/// Spin, then yield, then sleep.
///
/// `idle()` advances through the phases; `reset()` rewinds to spinning
/// after the caller makes progress.
#[derive(Debug)]
pub struct BackoffIdleStrategy {
    max_spins: u32,
    max_yields: u32,
    spins: u32,
    yields: u32,
}

impl BackoffIdleStrategy {
    /// Creates a strategy that spins `max_spins` times and yields
    /// `max_yields` times before sleeping.
    #[must_use]
    pub const fn new(max_spins: u32, max_yields: u32) -> Self {
        Self {
            max_spins,
            max_yields,
            spins: 0,
            yields: 0,
        }
    }

    /// Waits once, escalating across calls.
    pub fn idle(&mut self) {
        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            thread::yield_now();
        } else {
            thread::sleep(SLEEP_PERIOD);
        }
    }

    /// Rewinds to the spinning phase.
    pub fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_escalate() {
        let mut strategy = BackoffIdleStrategy::new(2, 2);
        // Walk through all phases; the sleep phase must terminate promptly.
        for _ in 0..6 {
            strategy.idle();
        }
        assert_eq!(strategy.spins, 2);
        assert_eq!(strategy.yields, 2);
    }

    #[test]
    fn test_reset_rewinds_to_spinning() {
        let mut strategy = BackoffIdleStrategy::new(1, 1);
        strategy.idle();
        strategy.idle();
        strategy.reset();
        assert_eq!(strategy.spins, 0);
        assert_eq!(strategy.yields, 0);
    }
}
