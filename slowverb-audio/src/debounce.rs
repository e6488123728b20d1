//! Trailing-edge debouncer
//!
//! Holds the most recent value and a deadline. Every `schedule` replaces the
//! value and pushes the deadline out by the quiescence window; `poll` hands the
//! value over once the deadline has passed.

use std::time::{Duration, Instant};

/// Last-value holder with a timer deadline
#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Replace the pending value and restart the window at `now`
    pub fn schedule(&mut self, value: T, now: Instant) {
        self.pending = Some(value);
        self.deadline = Some(now + self.window);
    }

    /// Drop the pending value, returning it
    pub fn cancel(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value becomes due
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending value if its window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.cancel(),
            _ => None,
        }
    }

    /// Take the pending value regardless of the deadline
    pub fn flush(&mut self) -> Option<T> {
        self.cancel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_fires_after_quiescence() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule(3.0, start);
        assert_eq!(debouncer.poll(start + Duration::from_millis(499)), None);
        assert_eq!(debouncer.poll(start + WINDOW), Some(3.0));
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.poll(start + WINDOW * 2), None);
    }

    #[test]
    fn test_rapid_updates_collapse_to_last() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let mut fired = Vec::new();
        for i in 0..20 {
            let now = start + Duration::from_millis(i * 50);
            debouncer.schedule(i as f64, now);
            if let Some(v) = debouncer.poll(now) {
                fired.push(v);
            }
        }
        let quiet = start + Duration::from_millis(19 * 50) + WINDOW;
        if let Some(v) = debouncer.poll(quiet) {
            fired.push(v);
        }
        assert_eq!(fired, vec![19.0]);
    }

    #[test]
    fn test_reschedule_pushes_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule(1, start);
        debouncer.schedule(2, start + Duration::from_millis(400));
        assert_eq!(debouncer.poll(start + WINDOW), None);
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(900)));
        assert_eq!(debouncer.poll(start + Duration::from_millis(900)), Some(2));
    }

    #[test]
    fn test_cancel_discards() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule("x", start);
        assert_eq!(debouncer.cancel(), Some("x"));
        assert_eq!(debouncer.poll(start + WINDOW), None);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn test_flush_ignores_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.schedule(7, start);
        assert_eq!(debouncer.flush(), Some(7));
    }
}
