//! Small shared helpers.

use std::time::{Duration, Instant};

/// Rate limiter for repeated identical log causes.
///
/// During prolonged contention the arbiter fails the same way hundreds of
/// times; the first occurrence is logged, repeats inside the window are
/// counted and collapsed into the next admitted message.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last_key: Option<&'static str>,
    last_emit: Option<Instant>,
    suppressed: u32,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Throttle {
            window,
            last_key: None,
            last_emit: None,
            suppressed: 0,
        }
    }

    /// Ask whether a message with this cause key should be emitted.
    /// Returns `Some(n)` with the number of suppressed repeats when the
    /// caller should log, `None` when the message is collapsed.
    pub fn admit(&mut self, key: &'static str) -> Option<u32> {
        let now = Instant::now();
        let same = self.last_key == Some(key);
        let within = self
            .last_emit
            .is_some_and(|t| now.duration_since(t) < self.window);
        if same && within {
            self.suppressed += 1;
            return None;
        }
        let n = self.suppressed;
        self.suppressed = 0;
        self.last_key = Some(key);
        self.last_emit = Some(now);
        Some(n)
    }
}
