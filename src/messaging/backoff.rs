use std::time::Duration;

/// Exponential reconnect delay for the consumer loop.
///
/// Starts at `initial`, doubles after every consecutive failure and never
/// exceeds `max`. [`reset`](Self::reset) is called after each successful
/// connect, so the next failure waits `initial` again.
///
/// ```text
/// initial = 1s, max = 5s:   1s → 2s → 4s → 5s → 5s ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to sleep now; advances the sequence for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
