//! Exponential reconnect backoff.
//!
//! Doubles on every consecutive failure up to a ceiling and snaps back
//! to the base once a message has been parsed successfully.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait before the next reconnect attempt.
    ///
    /// Advances the internal delay for the attempt after that.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Back to the base delay after a successful parse.
    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Delay the next failure would wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }
}
