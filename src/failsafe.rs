// Input watchdog
// Every input port holds its last sample until it goes quiet for longer than
// the failsafe timeout, then falls back to a safe value.

use std::time::{Duration, Instant};

/// Timeout from configured seconds. Non-positive or NaN expires at once;
/// values too large for a `Duration` never expire.
pub fn timeout_from_secs(secs: f64) -> Duration {
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug, Clone)]
pub struct FailsafeInput<T: Clone> {
    value: T,
    safe: T,
    timeout: Duration,
    received_at: Option<Instant>,
    stale: bool,
}

impl<T: Clone> FailsafeInput<T> {
    /// Create an input that starts out stale, holding `safe`
    pub fn new(safe: T, timeout: Duration) -> Self {
        Self {
            value: safe.clone(),
            safe,
            timeout,
            received_at: None,
            stale: true,
        }
    }

    /// Record a new sample
    pub fn push(&mut self, value: T, now: Instant) {
        self.value = value;
        self.received_at = Some(now);
        self.stale = false;
    }

    /// Current value, with the safe fallback applied once the sample is too old
    pub fn poll(&mut self, now: Instant) -> T {
        self.poll_with(now, |_, safe| safe.clone())
    }

    /// Like [`poll`](Self::poll), but lets the caller decide what a timeout
    /// does to the held value (e.g. clear only some fields).
    pub fn poll_with(&mut self, now: Instant, on_timeout: impl FnOnce(&T, &T) -> T) -> T {
        let expired = match self.received_at {
            Some(at) => now.saturating_duration_since(at) >= self.timeout,
            None => true,
        };
        if expired {
            self.value = on_timeout(&self.value, &self.safe);
            self.stale = true;
        }
        self.value.clone()
    }

    /// Last value without checking the timeout
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Whether the last poll fell back to the safe value
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Forget every sample
    pub fn reset(&mut self) {
        self.value = self.safe.clone();
        self.received_at = None;
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_stale_with_safe_value() {
        let mut input = FailsafeInput::new(0.0, Duration::from_secs(1));
        assert!(input.is_stale());
        assert_eq!(input.poll(Instant::now()), 0.0);
    }

    #[test]
    fn test_holds_sample_until_timeout() {
        let t0 = Instant::now();
        let mut input = FailsafeInput::new(0.0, Duration::from_secs(1));
        input.push(0.3, t0);

        assert_eq!(input.poll(t0 + Duration::from_millis(500)), 0.3);
        assert!(!input.is_stale());
        assert_eq!(input.poll(t0 + Duration::from_millis(999)), 0.3);

        // Timeout is inclusive
        assert_eq!(input.poll(t0 + Duration::from_secs(1)), 0.0);
        assert!(input.is_stale());
    }

    #[test]
    fn test_new_sample_clears_stale() {
        let t0 = Instant::now();
        let mut input = FailsafeInput::new(0, Duration::from_millis(100));
        input.push(5, t0);
        assert_eq!(input.poll(t0 + Duration::from_millis(200)), 0);
        input.push(7, t0 + Duration::from_millis(250));
        assert_eq!(input.poll(t0 + Duration::from_millis(300)), 7);
        assert!(!input.is_stale());
    }

    #[test]
    fn test_poll_with_partial_reset() {
        let t0 = Instant::now();
        let mut input = FailsafeInput::new((0, false), Duration::from_millis(100));
        input.push((3, true), t0);
        let value = input.poll_with(t0 + Duration::from_secs(1), |held, _| (held.0, false));
        assert_eq!(value, (3, false));
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(0.5), Duration::from_millis(500));
        assert_eq!(timeout_from_secs(1e300), Duration::MAX);
        assert_eq!(timeout_from_secs(-1.0), Duration::ZERO);
        assert_eq!(timeout_from_secs(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn test_reset() {
        let t0 = Instant::now();
        let mut input = FailsafeInput::new(1, Duration::from_secs(10));
        input.push(2, t0);
        input.reset();
        assert_eq!(*input.value(), 1);
        assert!(input.is_stale());
    }
}
