//! Per-category log throttling for the fast poll loop.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What a throttled log line is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Temperature,
    Memory,
    Polling,
}

/// Allows at most one log line per category per window.
#[derive(Debug)]
pub struct LogThrottle {
    window: Duration,
    last: Mutex<HashMap<LogCategory, Instant>>,
}

impl LogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if a line for `category` may be emitted now, and records it.
    pub fn allow(&self, category: LogCategory) -> bool {
        let now = Instant::now();
        let Ok(mut last) = self.last.lock() else {
            return true;
        };
        match last.get(&category) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                last.insert(category, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn one_line_per_window_per_category() {
        let throttle = LogThrottle::new(Duration::from_secs(10));
        assert!(throttle.allow(LogCategory::Memory));
        assert!(!throttle.allow(LogCategory::Memory));
        assert!(throttle.allow(LogCategory::Temperature));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!throttle.allow(LogCategory::Memory));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(throttle.allow(LogCategory::Memory));
    }
}
